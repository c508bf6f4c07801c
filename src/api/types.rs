//! API request and response types

use crate::conversation::DisplayView;
use crate::db::HistorySummary;
use crate::workflow::Action;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Request to answer a pending prompt with one of its actions
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: Action,
}

/// Direct call against a continuation pointer held by the client
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub resume_url: Option<String>,
    pub action: Option<Value>,
    pub session_id: Option<String>,
    pub data: Option<Value>,
}

impl ResumeRequest {
    /// Body forwarded to the resume URL
    pub fn forward_body(&self) -> Value {
        match &self.action {
            Some(action) if !action.is_null() => serde_json::json!({
                "action": action,
                "sessionId": self.session_id,
            }),
            _ => self
                .data
                .clone()
                .filter(|d| !d.is_null())
                .unwrap_or_else(|| serde_json::json!({})),
        }
    }
}

/// `?limit=` for history listings
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Response for a newly created session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Value,
}

/// Response with session, turns and their grouped projection
#[derive(Debug, Serialize)]
pub struct SessionWithTurnsResponse {
    pub session: Value,
    pub turns: Vec<Value>,
    pub view: DisplayView,
    pub busy: bool,
}

/// Response with local session summaries
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub sessions: Vec<HistorySummary>,
}

/// Response with summaries kept by the workflow backend
#[derive(Debug, Serialize)]
pub struct WorkflowHistoryResponse {
    pub items: Vec<Value>,
}

/// Response for chat action
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub queued: bool,
}

/// Response for cancel action
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub ok: bool,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
