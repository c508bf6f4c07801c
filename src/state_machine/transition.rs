//! Pure state transition function

use super::state::Exchange;
use super::{Effect, Event, WorkflowContext, WorkflowState};
use crate::conversation::NewTurn;
use crate::workflow::{
    classify, Action, ContinuationPointer, RequestBody, RequestTarget, WaitMode, WorkflowFrame,
    WorkflowRequest,
};
use serde_json::json;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: WorkflowState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: WorkflowState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Still working on the previous request (cancel it first)")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("No prompt is waiting for an action")]
    NoPendingPrompt,
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs; all I/O is
/// described by the returned effects.
pub fn transition(
    state: &WorkflowState,
    context: &WorkflowContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User input
        // ============================================================
        (_, Event::UserMessage { text }) if text.trim().is_empty() => {
            Err(TransitionError::EmptyMessage)
        }

        // Idle + UserMessage -> AwaitingInitialResponse (chat webhook)
        (WorkflowState::Idle, Event::UserMessage { text }) => {
            let text = text.trim().to_string();
            Ok(begin(
                context,
                RequestTarget::Chat,
                NewTurn::user(&text),
                RequestBody::Message { text },
            ))
        }

        // Idle + UserAction: only legacy button actions make sense here
        (WorkflowState::Idle, Event::UserAction { action }) => {
            let text = action
                .button_text()
                .ok_or(TransitionError::NoPendingPrompt)?
                .to_string();
            Ok(begin(
                context,
                RequestTarget::Chat,
                NewTurn::user(&text),
                RequestBody::Message { text },
            ))
        }

        // AwaitingUserInput + input -> consume the retained pointer
        (WorkflowState::AwaitingUserInput { pointer }, Event::UserMessage { text }) => {
            let text = text.trim().to_string();
            Ok(begin(
                context,
                continuation(pointer),
                NewTurn::user(&text),
                RequestBody::Message { text },
            ))
        }

        (WorkflowState::AwaitingUserInput { pointer }, Event::UserAction { action }) => {
            let Action { label, payload } = action;
            Ok(begin(
                context,
                continuation(pointer),
                NewTurn::user(&label),
                RequestBody::Action { payload },
            ))
        }

        // ============================================================
        // Cancellation
        // ============================================================
        (WorkflowState::Idle, Event::UserCancel) => Ok(TransitionResult::new(WorkflowState::Idle)),

        (_, Event::UserCancel) => Ok(TransitionResult::new(WorkflowState::Idle)
            .with_effect(Effect::AbortRequest)
            .with_effect(Effect::PersistState)),

        // ============================================================
        // Response processing
        // ============================================================
        (
            WorkflowState::AwaitingInitialResponse { exchange }
            | WorkflowState::AutoContinuing { exchange },
            Event::FrameReceived { frame, .. },
        ) => Ok(absorb_frame(state, exchange, &frame)),

        (
            WorkflowState::AwaitingInitialResponse { exchange }
            | WorkflowState::AutoContinuing { exchange },
            Event::ResponseComplete { .. },
        ) => Ok(complete(exchange, context)),

        // A consumed pointer ends the branch quietly
        (
            WorkflowState::AwaitingInitialResponse { .. } | WorkflowState::AutoContinuing { .. },
            Event::RequestFailed { error, .. },
        ) if error.is_conflict() => Ok(TransitionResult::new(WorkflowState::Idle)
            .with_effect(Effect::PersistState)),

        (
            WorkflowState::AwaitingInitialResponse { .. } | WorkflowState::AutoContinuing { .. },
            Event::RequestFailed { error, .. },
        ) => Ok(TransitionResult::new(WorkflowState::Idle)
            .with_effect(Effect::append_turn(NewTurn::error()))
            .with_effect(Effect::PersistState)
            .with_effect(Effect::NotifyClient {
                event_type: "error".to_string(),
                data: json!({ "message": error.message }),
            })),

        // ============================================================
        // Placeholder retry
        // ============================================================
        (
            WorkflowState::RetryBackoff { request, attempt },
            Event::RetryTimeout {
                attempt: retry_attempt,
            },
        ) if *attempt == retry_attempt => Ok(TransitionResult::new(WorkflowState::AutoContinuing {
            exchange: Exchange::retry(request.clone(), *attempt),
        })
        .with_effect(Effect::PersistState)
        .with_effect(Effect::issue(request.clone()))),

        // Busy states reject new input
        (_, Event::UserMessage { .. } | Event::UserAction { .. }) => Err(TransitionError::Busy),

        // ============================================================
        // Stale transport and timer events are ignored
        // ============================================================
        (
            _,
            Event::FrameReceived { .. }
            | Event::ResponseComplete { .. }
            | Event::RequestFailed { .. }
            | Event::RetryTimeout { .. },
        ) => Ok(TransitionResult::new(state.clone())),
    }
}

/// Record the user turn and send the first request of an exchange
fn begin(
    context: &WorkflowContext,
    target: RequestTarget,
    turn: NewTurn,
    body: RequestBody,
) -> TransitionResult {
    let request = WorkflowRequest {
        session_id: context.session_id.clone(),
        target,
        body,
    };

    TransitionResult::new(WorkflowState::AwaitingInitialResponse {
        exchange: Exchange::new(request.clone()),
    })
    .with_effect(Effect::append_turn(turn))
    .with_effect(Effect::PersistState)
    .with_effect(Effect::issue(request))
}

fn continuation(pointer: &ContinuationPointer) -> RequestTarget {
    RequestTarget::Continuation {
        url: pointer.url.clone(),
    }
}

/// Apply one classified frame. A later pointer overwrites an earlier one.
fn absorb_frame(state: &WorkflowState, exchange: &Exchange, frame: &WorkflowFrame) -> TransitionResult {
    let classification = classify(frame);
    let mut exchange = exchange.clone();
    let mut effects = Vec::new();

    if classification.placeholder {
        exchange.saw_placeholder = true;
    }
    if let Some(payload) = classification.visualization {
        exchange.saw_content = true;
        effects.push(Effect::ShowVisualization { payload });
    }
    if let Some(reply) = classification.reply {
        exchange.saw_content = true;
        effects.push(Effect::append_turn(NewTurn::assistant(reply)));
    }
    if let Some(pointer) = classification.pointer {
        exchange.live_pointer = Some(pointer);
    }

    TransitionResult::new(state.with_exchange(exchange)).with_effects(effects)
}

/// Decide what follows a finished response
fn complete(exchange: &Exchange, context: &WorkflowContext) -> TransitionResult {
    match &exchange.live_pointer {
        Some(pointer) if pointer.wait_mode == WaitMode::Automatic => {
            let request = WorkflowRequest {
                session_id: context.session_id.clone(),
                target: continuation(pointer),
                body: RequestBody::Resume,
            };
            TransitionResult::new(WorkflowState::AutoContinuing {
                exchange: Exchange::new(request.clone()),
            })
            .with_effect(Effect::PersistState)
            .with_effect(Effect::issue(request))
        }

        Some(pointer) => TransitionResult::new(WorkflowState::AwaitingUserInput {
            pointer: pointer.clone(),
        })
        .with_effect(Effect::PersistState),

        // Only a continuation answered by nothing but placeholders is
        // retried; re-posting a chat message would duplicate the question
        None if exchange.saw_placeholder
            && !exchange.saw_content
            && exchange.request.is_continuation() =>
        {
            let retries_done = exchange.attempt.saturating_sub(1);
            if retries_done < context.retry.max_attempts {
                let next_attempt = exchange.attempt + 1;
                TransitionResult::new(WorkflowState::RetryBackoff {
                    request: exchange.request.clone(),
                    attempt: next_attempt,
                })
                .with_effect(Effect::PersistState)
                .with_effect(Effect::ScheduleRetry {
                    delay: context.retry.delay_for(exchange.attempt),
                    attempt: next_attempt,
                })
                .with_effect(Effect::notice(
                    "Waiting for the workflow to produce a result",
                    json!({ "attempt": next_attempt }),
                ))
            } else {
                TransitionResult::new(WorkflowState::Idle).with_effect(Effect::PersistState)
            }
        }

        None => TransitionResult::new(WorkflowState::Idle).with_effect(Effect::PersistState),
    }
}
