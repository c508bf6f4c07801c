//! Workflow transport error types

use thiserror::Error;

/// Transport failure with classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkflowError {
    pub kind: WorkflowErrorKind,
    pub message: String,
}

impl WorkflowError {
    pub fn new(kind: WorkflowErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::Network, message)
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::Http(status), message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::Conflict, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::InvalidRequest, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::Decode, message)
    }

    pub fn cancelled() -> Self {
        Self::new(WorkflowErrorKind::Cancelled, "Request cancelled")
    }

    /// The continuation pointer had already been consumed
    pub fn is_conflict(&self) -> bool {
        self.kind == WorkflowErrorKind::Conflict
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else if e.is_builder() {
            Self::invalid_request(format!("Invalid request: {e}"))
        } else if e.is_decode() {
            Self::decode(format!("Failed to read response: {e}"))
        } else {
            Self::network(format!("Request failed: {e}"))
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowErrorKind {
    /// Timeouts, refused connections, broken streams
    Network,
    /// Non-2xx status other than 409
    Http(u16),
    /// 409 on a continuation pointer
    Conflict,
    /// Request aborted locally
    Cancelled,
    /// Response body could not be read or decoded
    Decode,
    /// Malformed URL or body
    InvalidRequest,
}
