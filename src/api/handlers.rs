//! HTTP request handlers

use super::relay::{relay_resume, relay_webhook};
use super::sse::sse_stream;
use super::types::{
    ActionRequest, CancelResponse, ChatRequest, ChatResponse, ErrorResponse, HistoryResponse,
    LimitQuery, SessionResponse, SessionWithTurnsResponse, SuccessResponse,
    WorkflowHistoryResponse,
};
use super::AppState;
use crate::conversation::group_turns;
use crate::db::DbError;
use crate::runtime::SseEvent;
use crate::state_machine::Event;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/sessions/new", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        // SSE streaming
        .route("/api/sessions/:id/stream", get(stream_session))
        // User input
        .route("/api/sessions/:id/chat", post(send_chat))
        .route("/api/sessions/:id/action", post(send_action))
        .route("/api/sessions/:id/cancel", post(cancel_session))
        .route("/api/sessions/:id/close", post(close_session))
        // History
        .route("/api/history", get(list_history))
        .route("/api/workflow-history", get(workflow_history))
        // Workflow relay
        .route("/api/webhook/*path", get(relay_webhook).post(relay_webhook))
        .route("/api/resume", post(relay_resume))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Session Lifecycle
// ============================================================

async fn create_session(State(state): State<AppState>) -> Result<Json<SessionResponse>, AppError> {
    let session = state
        .runtime
        .create_session()
        .map_err(AppError::Internal)?;

    Ok(Json(SessionResponse {
        session: serde_json::to_value(&session).unwrap_or(Value::Null),
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionWithTurnsResponse>, AppError> {
    let db = state.runtime.db();
    let session = db.get_session(&id)?;
    let turns = db.get_turns(&id)?;

    Ok(Json(SessionWithTurnsResponse {
        session: serde_json::to_value(&session).unwrap_or(Value::Null),
        view: group_turns(&turns),
        turns: turns
            .iter()
            .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
            .collect(),
        busy: session.state.is_busy(),
    }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    require_session(&state, &id)?;
    state.runtime.delete(&id).await.map_err(AppError::Internal)?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    require_session(&state, &id)?;
    state.runtime.close(&id).await;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// SSE Streaming
// ============================================================

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // Subscribe first so nothing between the snapshot and the stream is lost
    let events_rx = match state.runtime.subscribe(&id).await {
        Ok(receiver) => receiver,
        Err(e) => {
            require_session(&state, &id)?;
            return Err(AppError::Internal(e));
        }
    };

    let db = state.runtime.db();
    let session = db.get_session(&id)?;
    let turns = db.get_turns(&id)?;

    let init_event = SseEvent::Init {
        session: serde_json::to_value(&session).unwrap_or(Value::Null),
        last_sequence_id: turns.last().map_or(0, |t| t.sequence_id),
        turns: turns
            .iter()
            .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
            .collect(),
        busy: session.state.is_busy(),
    };

    Ok(sse_stream(init_event, events_rx))
}

// ============================================================
// User Input
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message is empty".to_string()));
    }
    require_session(&state, &id)?;

    state
        .runtime
        .send_event(&id, Event::UserMessage { text: req.text })
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ChatResponse { queued: true }))
}

async fn send_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    require_session(&state, &id)?;

    state
        .runtime
        .send_event(&id, Event::UserAction { action: req.action })
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ChatResponse { queued: true }))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    require_session(&state, &id)?;

    state
        .runtime
        .send_event(&id, Event::UserCancel)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(CancelResponse { ok: true }))
}

// ============================================================
// History
// ============================================================

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let sessions = state.runtime.db().list_history(history_limit(&query))?;
    Ok(Json(HistoryResponse { sessions }))
}

async fn workflow_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<WorkflowHistoryResponse>, AppError> {
    let items = state
        .runtime
        .client()
        .load_history(history_limit(&query))
        .await
        .map_err(|e| AppError::BadGateway(e.to_string()))?;
    Ok(Json(WorkflowHistoryResponse { items }))
}

fn history_limit(query: &LimitQuery) -> usize {
    query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("nlq-dashboard ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Helpers
// ============================================================

fn require_session(state: &AppState, id: &str) -> Result<(), AppError> {
    if state.runtime.db().session_exists(id)? {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("Session not found: {id}")))
    }
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    Internal(String),
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::SessionNotFound(_) => AppError::NotFound(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
