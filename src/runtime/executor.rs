//! Session runtime executor

use super::traits::Storage;
use super::SseEvent;

use crate::conversation::{ConversationAccumulator, ConversationUpdate};
use crate::state_machine::{transition, Effect, Event, WorkflowContext, WorkflowState};
use crate::workflow::{WorkflowClient, WorkflowError, WorkflowRequest};
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Generic session runtime that can work with any storage and workflow client
pub struct ConversationRuntime<S, C>
where
    S: Storage + Clone + 'static,
    C: WorkflowClient + ?Sized + 'static,
{
    context: WorkflowContext,
    state: WorkflowState,
    storage: S,
    client: Arc<C>,
    conversation: ConversationAccumulator,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    /// Request whose transport events are accepted; everything else is stale
    in_flight: Option<u64>,
    next_request_id: u64,
    /// Token to cancel the request in flight
    request_cancel_token: Option<CancellationToken>,
    /// Token to cancel a pending retry timer
    retry_cancel_token: Option<CancellationToken>,
    /// Stops the runtime when the session is closed
    shutdown: CancellationToken,
}

impl<S, C> ConversationRuntime<S, C>
where
    S: Storage + Clone + 'static,
    C: WorkflowClient + ?Sized + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: WorkflowContext,
        state: WorkflowState,
        storage: S,
        client: Arc<C>,
        conversation: ConversationAccumulator,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<SseEvent>,
    ) -> Self {
        Self {
            context,
            state,
            storage,
            client,
            conversation,
            event_rx,
            event_tx,
            broadcast_tx,
            in_flight: None,
            next_request_id: 1,
            request_cancel_token: None,
            retry_cancel_token: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop the runtime when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.context.session_id, state = self.state.name(), "Starting session runtime");

        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    self.stop().await;
                    break;
                }

                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.process_event(event).await {
                        tracing::debug!(error = %e, "Event rejected");
                    }
                }

                else => break,
            }
        }

        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        if let Some(request_id) = event.request_id() {
            if self.in_flight != Some(request_id) {
                tracing::debug!(request_id, "Dropping event from stale request");
                return Ok(());
            }
            if event.ends_request() {
                self.in_flight = None;
                self.request_cancel_token = None;
            }
        }

        // Pure state transition
        let result = match transition(&self.state, &self.context, event) {
            Ok(r) => r,
            Err(e) => {
                // Transition errors are user-facing (e.g., "busy")
                let _ = self.broadcast_tx.send(SseEvent::Error {
                    message: e.to_string(),
                });
                return Err(e.to_string());
            }
        };

        let old_state = std::mem::replace(&mut self.state, result.new_state);
        if old_state.name() != self.state.name() {
            tracing::info!(
                session_id = %self.context.session_id,
                from = old_state.name(),
                to = self.state.name(),
                "State transition"
            );
        }

        for effect in result.effects {
            self.execute_effect(effect).await;
        }

        Ok(())
    }

    /// Execute an effect. Storage failures are logged and do not stop the
    /// session.
    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::AppendTurn { turn } => {
                let turn = turn.into_turn(self.conversation.next_sequence_id(), Utc::now());
                if let Err(e) = self
                    .storage
                    .add_turn(&self.context.session_id, &turn)
                    .await
                {
                    tracing::error!(error = %e, sequence_id = turn.sequence_id, "Failed to persist turn");
                }
                let update = ConversationUpdate::TurnAppended(turn.clone());
                self.conversation.push(turn);
                self.publish(update);
            }

            Effect::ShowVisualization { payload } => {
                if let Err(e) = self
                    .storage
                    .set_visualization(&self.context.session_id, &payload)
                    .await
                {
                    tracing::error!(error = %e, "Failed to persist visualization");
                }
                let update = ConversationUpdate::VisualizationChanged(payload.clone());
                self.conversation.show_visualization(payload);
                self.publish(update);
            }

            Effect::IssueRequest { request } => self.issue_request(request),

            Effect::AbortRequest => self.abort_pending(),

            Effect::ScheduleRetry { delay, attempt } => {
                let cancel_token = CancellationToken::new();
                self.retry_cancel_token = Some(cancel_token.clone());
                let event_tx = self.event_tx.clone();

                tracing::info!(attempt, delay_ms = %delay.as_millis(), "Scheduling placeholder retry");
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = cancel_token.cancelled() => {}
                        () = tokio::time::sleep(delay) => {
                            let _ = event_tx.send(Event::RetryTimeout { attempt }).await;
                        }
                    }
                });
            }

            Effect::PersistState => {
                if let Err(e) = self
                    .storage
                    .update_state(&self.context.session_id, &self.state)
                    .await
                {
                    tracing::error!(error = %e, "Failed to persist state");
                }

                let state_json = serde_json::to_value(&self.state).unwrap_or(Value::Null);
                let _ = self
                    .broadcast_tx
                    .send(SseEvent::StateChange { state: state_json });
            }

            Effect::NotifyClient { event_type, data } => {
                let event = match event_type.as_str() {
                    "error" => SseEvent::Error {
                        message: data
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("Request failed")
                            .to_string(),
                    },
                    _ => SseEvent::Notice { data },
                };
                let _ = self.broadcast_tx.send(event);
            }
        }
    }

    /// Conversation changes go out on the same channel as state changes so
    /// subscribers see them in the order they happened
    fn publish(&self, update: ConversationUpdate) {
        let _ = self.broadcast_tx.send(SseEvent::from(update));
    }

    /// Start a request in the background. Refused while another is in flight.
    fn issue_request(&mut self, request: WorkflowRequest) {
        if let Some(current) = self.in_flight {
            tracing::error!(
                session_id = %self.context.session_id,
                in_flight = current,
                "Refusing to issue a second concurrent request"
            );
            return;
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.in_flight = Some(request_id);

        let cancel_token = CancellationToken::new();
        self.request_cancel_token = Some(cancel_token.clone());

        let client = self.client.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tracing::info!(
                request_id,
                continuation = request.is_continuation(),
                "Issuing workflow request (background)"
            );

            // Race the request against cancellation
            tokio::select! {
                biased;

                () = cancel_token.cancelled() => {
                    tracing::info!(request_id, "Workflow request cancelled");
                    // Already stale by the time it arrives; dropped by the runtime
                    let _ = event_tx
                        .send(Event::RequestFailed {
                            request_id,
                            error: WorkflowError::cancelled(),
                        })
                        .await;
                }

                event = drive_request(client.as_ref(), &request, request_id, &event_tx) => {
                    let _ = event_tx.send(event).await;
                }
            }
        });
    }

    /// Abort in-flight work and leave the stored state resumable
    async fn stop(&mut self) {
        self.abort_pending();
        let resumable = self.state.clone().after_restart();
        if resumable != self.state {
            tracing::info!(
                session_id = %self.context.session_id,
                from = self.state.name(),
                to = resumable.name(),
                "Session closed while busy"
            );
            self.state = resumable;
            self.execute_effect(Effect::PersistState).await;
        }
    }

    fn abort_pending(&mut self) {
        if let Some(token) = self.request_cancel_token.take() {
            token.cancel();
        }
        if let Some(token) = self.retry_cancel_token.take() {
            token.cancel();
        }
        self.in_flight = None;
    }
}

/// Forward every frame of one response and return the event that ends it
async fn drive_request<C>(
    client: &C,
    request: &WorkflowRequest,
    request_id: u64,
    event_tx: &mpsc::Sender<Event>,
) -> Event
where
    C: WorkflowClient + ?Sized,
{
    let mut frames = match client.open(request).await {
        Ok(frames) => frames,
        Err(error) => return Event::RequestFailed { request_id, error },
    };

    while let Some(item) = frames.next().await {
        match item {
            Ok(frame) => {
                if event_tx
                    .send(Event::FrameReceived { request_id, frame })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(error) => return Event::RequestFailed { request_id, error },
        }
    }

    Event::ResponseComplete { request_id }
}
