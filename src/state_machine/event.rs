//! Events that drive the continuation engine

use crate::workflow::{Action, WorkflowError, WorkflowFrame};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
    },
    UserAction {
        action: Action,
    },
    UserCancel,

    // Transport events, tagged with the request that produced them
    FrameReceived {
        request_id: u64,
        frame: WorkflowFrame,
    },
    ResponseComplete {
        request_id: u64,
    },
    RequestFailed {
        request_id: u64,
        error: WorkflowError,
    },

    // Timer events
    RetryTimeout {
        attempt: u32,
    },
}

impl Event {
    /// Request id of a transport event
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Event::FrameReceived { request_id, .. }
            | Event::ResponseComplete { request_id }
            | Event::RequestFailed { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Last event of a request
    pub fn ends_request(&self) -> bool {
        matches!(
            self,
            Event::ResponseComplete { .. } | Event::RequestFailed { .. }
        )
    }
}
