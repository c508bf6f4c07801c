//! Same-origin relay to the workflow backend
//!
//! Browsers cannot call the workflow webhooks directly, so these handlers
//! forward the call server-side and stream the backend's answer back.

use super::handlers::AppError;
use super::types::ResumeRequest;
use super::AppState;
use crate::config::WorkflowConfig;
use crate::workflow::WorkflowError;
use axum::{
    body::{Body, Bytes},
    extract::{Path, RawQuery, State},
    http::{
        header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT},
        HeaderMap, HeaderValue, Method,
    },
    response::Response,
    Json,
};
use reqwest::Client;

const DEFAULT_USER_AGENT: &str = "nlq-dashboard-relay";

/// Forwards browser calls to the workflow backend
pub struct Relay {
    client: Client,
    config: WorkflowConfig,
}

impl Relay {
    pub fn new(config: WorkflowConfig) -> Result<Self, WorkflowError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    /// Backend URL for a relayed webhook path, query string included
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let url = self.config.relay_url(path);
        match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{url}?{query}"),
            None => url,
        }
    }

    async fn forward(
        &self,
        method: Method,
        url: &str,
        user_agent: &str,
        body: Option<Bytes>,
    ) -> Result<Response, AppError> {
        tracing::debug!(%method, url = %url, "Relaying workflow call");

        let mut request = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, user_agent);
        if let Some(body) = body {
            request = request.body(body);
        }

        let upstream = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, url = %url, "Relay request failed");
            AppError::BadGateway(format!("Proxy error: {e}"))
        })?;

        stream_back(upstream)
    }
}

/// Mirror the backend's status and content type and stream its body
fn stream_back(upstream: reqwest::Response) -> Result<Response, AppError> {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type.clone());
    if is_streaming(&content_type) {
        builder = builder.header(CACHE_CONTROL, "no-cache");
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Anything that is not a plain JSON document is treated as a stream
fn is_streaming(content_type: &HeaderValue) -> bool {
    !content_type
        .to_str()
        .is_ok_and(|ct| ct.contains("application/json"))
}

// ============================================================
// Handlers
// ============================================================

/// `GET|POST /api/webhook/*path`
pub async fn relay_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let url = state.relay.target_url(&path, query.as_deref());
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_USER_AGENT);

    let body = if method == Method::POST {
        Some(if body.is_empty() {
            Bytes::from_static(b"{}")
        } else {
            body
        })
    } else {
        None
    };

    state.relay.forward(method, &url, user_agent, body).await
}

/// `POST /api/resume`
pub async fn relay_resume(
    State(state): State<AppState>,
    Json(req): Json<ResumeRequest>,
) -> Result<Response, AppError> {
    let Some(resume_url) = req.resume_url.as_deref().filter(|u| !u.is_empty()) else {
        return Err(AppError::BadRequest("resumeUrl is required".to_string()));
    };
    if !(resume_url.starts_with("http://") || resume_url.starts_with("https://")) {
        return Err(AppError::BadRequest(
            "resumeUrl must be an http(s) URL".to_string(),
        ));
    }

    tracing::info!(url = %resume_url, has_action = req.action.is_some(), "Relaying resume call");
    let body = serde_json::to_vec(&req.forward_body())
        .map_err(|e| AppError::Internal(e.to_string()))?;

    state
        .relay
        .forward(
            Method::POST,
            resume_url,
            DEFAULT_USER_AGENT,
            Some(Bytes::from(body)),
        )
        .await
}
