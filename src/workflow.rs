//! Workflow backend protocol
//!
//! Frame decoding, classification and the HTTP transport used by the
//! continuation engine.

mod classify;
mod client;
mod error;
mod frame;
mod record;


pub use classify::{
    classify, AssistantReply, ContinuationPointer, ResponseKind, VisualizationPayload, WaitMode,
};
pub use client::{HttpWorkflowClient, RequestBody, RequestTarget, WorkflowRequest};
pub use error::WorkflowError;
pub use record::{Action, WorkflowFrame};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

/// Frames of one response, in arrival order
pub type FrameStream = BoxStream<'static, Result<WorkflowFrame, WorkflowError>>;

/// Transport to the workflow backend
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Issue a request and return its frames as they arrive
    async fn open(&self, request: &WorkflowRequest) -> Result<FrameStream, WorkflowError>;

    /// Conversation summaries kept by the backend, newest first
    async fn load_history(&self, limit: usize) -> Result<Vec<Value>, WorkflowError>;
}

#[async_trait]
impl<T: WorkflowClient + ?Sized> WorkflowClient for Arc<T> {
    async fn open(&self, request: &WorkflowRequest) -> Result<FrameStream, WorkflowError> {
        (**self).open(request).await
    }

    async fn load_history(&self, limit: usize) -> Result<Vec<Value>, WorkflowError> {
        (**self).load_history(limit).await
    }
}

/// Logging wrapper for workflow clients
pub struct LoggingClient {
    inner: Arc<dyn WorkflowClient>,
}

impl LoggingClient {
    pub fn new(inner: Arc<dyn WorkflowClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl WorkflowClient for LoggingClient {
    async fn open(&self, request: &WorkflowRequest) -> Result<FrameStream, WorkflowError> {
        let start = std::time::Instant::now();
        let result = self.inner.open(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    session_id = %request.session_id,
                    continuation = request.is_continuation(),
                    duration_ms = %duration.as_millis(),
                    "Workflow request opened"
                );
            }
            Err(e) if e.is_conflict() => {
                tracing::info!(
                    session_id = %request.session_id,
                    duration_ms = %duration.as_millis(),
                    "Continuation already consumed"
                );
            }
            Err(e) => {
                tracing::error!(
                    session_id = %request.session_id,
                    continuation = request.is_continuation(),
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    "Workflow request failed"
                );
            }
        }

        result
    }

    async fn load_history(&self, limit: usize) -> Result<Vec<Value>, WorkflowError> {
        let start = std::time::Instant::now();
        let result = self.inner.load_history(limit).await;

        match &result {
            Ok(items) => tracing::debug!(
                count = items.len(),
                duration_ms = %start.elapsed().as_millis(),
                "Workflow history loaded"
            ),
            Err(e) => tracing::warn!(error = %e, "Workflow history unavailable"),
        }

        result
    }
}
