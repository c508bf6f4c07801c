//! Effects produced by state transitions

use crate::conversation::NewTurn;
use crate::workflow::{VisualizationPayload, WorkflowRequest};
use serde_json::Value;
use std::time::Duration;

/// Effects to be executed after state transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Append a turn to the conversation
    AppendTurn { turn: NewTurn },

    /// Replace the displayed visualization
    ShowVisualization { payload: VisualizationPayload },

    /// Send a request to the workflow backend
    IssueRequest { request: WorkflowRequest },

    /// Abort the request in flight and any pending retry
    AbortRequest,

    /// Schedule a retry
    ScheduleRetry { delay: Duration, attempt: u32 },

    /// Persist the new state
    PersistState,

    /// Notify connected clients
    NotifyClient { event_type: String, data: Value },
}

impl Effect {
    pub fn append_turn(turn: NewTurn) -> Self {
        Effect::AppendTurn { turn }
    }

    pub fn issue(request: WorkflowRequest) -> Self {
        Effect::IssueRequest { request }
    }

    #[allow(clippy::needless_pass_by_value)] // data is consumed by json! macro
    pub fn notice(message: &str, data: Value) -> Self {
        Effect::NotifyClient {
            event_type: "notice".to_string(),
            data: serde_json::json!({
                "message": message,
                "details": data
            }),
        }
    }
}
