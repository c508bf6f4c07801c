//! HTTP transport to the workflow backend

use super::error::WorkflowError;
use super::frame::{decode_document, frame_stream};
use super::{FrameStream, WorkflowClient};
use crate::config::WorkflowConfig;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Longest slice of an error body kept in the error message
const ERROR_BODY_PREVIEW: usize = 200;

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestTarget {
    /// The chat webhook that starts a new workflow run
    Chat,
    /// A continuation pointer handed out by an earlier response
    Continuation { url: String },
}

/// What a request carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    Message { text: String },
    Action { payload: Value },
    /// Automatic continuation, nothing but the session id
    Resume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub session_id: String,
    pub target: RequestTarget,
    pub body: RequestBody,
}

impl WorkflowRequest {
    pub fn is_continuation(&self) -> bool {
        matches!(self.target, RequestTarget::Continuation { .. })
    }

    /// JSON body as the backend expects it
    pub fn wire_body(&self) -> Value {
        match &self.body {
            RequestBody::Message { text } => json!({
                "message": text,
                "sessionId": self.session_id,
            }),
            RequestBody::Action { payload } => json!({
                "action": payload,
                "sessionId": self.session_id,
            }),
            RequestBody::Resume => json!({ "sessionId": self.session_id }),
        }
    }
}

/// reqwest-backed [`WorkflowClient`]
pub struct HttpWorkflowClient {
    client: Client,
    chat_url: String,
    history_url: String,
}

impl HttpWorkflowClient {
    pub fn new(config: &WorkflowConfig) -> Result<Self, WorkflowError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            chat_url: config.chat_url(),
            history_url: config.history_url(),
        })
    }

    fn url_for<'a>(&'a self, target: &'a RequestTarget) -> &'a str {
        match target {
            RequestTarget::Chat => &self.chat_url,
            RequestTarget::Continuation { url } => url,
        }
    }
}

#[async_trait]
impl WorkflowClient for HttpWorkflowClient {
    async fn open(&self, request: &WorkflowRequest) -> Result<FrameStream, WorkflowError> {
        let url = self.url_for(&request.target);

        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&request.wire_body())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT && request.is_continuation() {
            return Err(WorkflowError::conflict("Continuation was already consumed"));
        }
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        if is_json_document(&response) {
            let body = response.bytes().await?;
            let frames = decode_document(&body);
            Ok(stream::iter(frames.into_iter().map(Ok)).boxed())
        } else {
            Ok(frame_stream(response.bytes_stream()).boxed())
        }
    }

    async fn load_history(&self, limit: usize) -> Result<Vec<Value>, WorkflowError> {
        let cache_buster = chrono::Utc::now().timestamp_millis().to_string();
        let response = self
            .client
            .get(&self.history_url)
            .query(&[("limit", limit.to_string()), ("_", cache_buster)])
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let data: Value = response.json().await?;
        let mut items = match data {
            Value::Array(items) => items,
            other => vec![other],
        };
        items.reverse();
        Ok(items)
    }
}

/// Buffered JSON bodies may hold pretty-printed documents that the line
/// parser cannot split, so they are decoded whole.
fn is_json_document(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("application/json"))
}

async fn status_error(response: Response) -> WorkflowError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
    WorkflowError::http(status, format!("HTTP {status}: {preview}"))
}
