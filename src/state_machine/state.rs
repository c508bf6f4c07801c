//! Workflow state types

use crate::config::RetryPolicy;
use crate::workflow::{ContinuationPointer, WorkflowRequest};
use serde::{Deserialize, Serialize};

/// One request in flight and what its frames have produced so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub request: WorkflowRequest,
    /// 1 for the first attempt, bumped by each placeholder retry
    pub attempt: u32,
    /// Latest continuation pointer seen in this response. Acted on when the
    /// response completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_pointer: Option<ContinuationPointer>,
    #[serde(default)]
    pub saw_placeholder: bool,
    /// A reply or visualization arrived; placeholders no longer count
    #[serde(default)]
    pub saw_content: bool,
}

impl Exchange {
    pub fn new(request: WorkflowRequest) -> Self {
        Self::retry(request, 1)
    }

    pub fn retry(request: WorkflowRequest, attempt: u32) -> Self {
        Self {
            request,
            attempt,
            live_pointer: None,
            saw_placeholder: false,
            saw_content: false,
        }
    }
}

/// Continuation engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowState {
    /// Nothing in flight, no pointer retained
    #[default]
    Idle,

    /// Request triggered by user input is in flight
    AwaitingInitialResponse { exchange: Exchange },

    /// Request against an automatic continuation pointer is in flight
    AutoContinuing { exchange: Exchange },

    /// Workflow paused for an explicit user choice
    AwaitingUserInput { pointer: ContinuationPointer },

    /// Backend acknowledged with a placeholder; waiting before re-issuing
    /// the same request
    RetryBackoff {
        request: WorkflowRequest,
        attempt: u32,
    },
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::AwaitingInitialResponse { .. } => "awaiting_initial_response",
            WorkflowState::AutoContinuing { .. } => "auto_continuing",
            WorkflowState::AwaitingUserInput { .. } => "awaiting_user_input",
            WorkflowState::RetryBackoff { .. } => "retry_backoff",
        }
    }

    /// Whether the engine is working and rejects new input
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            WorkflowState::AwaitingInitialResponse { .. }
                | WorkflowState::AutoContinuing { .. }
                | WorkflowState::RetryBackoff { .. }
        )
    }

    pub fn exchange(&self) -> Option<&Exchange> {
        match self {
            WorkflowState::AwaitingInitialResponse { exchange }
            | WorkflowState::AutoContinuing { exchange } => Some(exchange),
            _ => None,
        }
    }

    /// The pointer kept for the user's next input
    #[allow(dead_code)] // Used in tests
    pub fn retained_pointer(&self) -> Option<&ContinuationPointer> {
        match self {
            WorkflowState::AwaitingUserInput { pointer } => Some(pointer),
            _ => None,
        }
    }

    /// Same variant with its exchange replaced
    pub(crate) fn with_exchange(&self, exchange: Exchange) -> Self {
        match self {
            WorkflowState::AutoContinuing { .. } => WorkflowState::AutoContinuing { exchange },
            _ => WorkflowState::AwaitingInitialResponse { exchange },
        }
    }

    /// State to resume with after a restart. In-flight work cannot be
    /// resumed, but a pause for user input survives.
    pub fn after_restart(self) -> Self {
        match self {
            WorkflowState::AwaitingUserInput { .. } => self,
            _ => WorkflowState::Idle,
        }
    }
}

/// Per-session configuration for the engine
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub session_id: String,
    pub retry: RetryPolicy,
}

impl WorkflowContext {
    pub fn new(session_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            session_id: session_id.into(),
            retry,
        }
    }
}
