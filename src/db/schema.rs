//! Database schema and types

use crate::state_machine::WorkflowState;
use crate::workflow::VisualizationPayload;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT '{"type":"idle"}',
    visualization TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);

CREATE TABLE IF NOT EXISTS turns (
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT,
    actions TEXT NOT NULL DEFAULT '[]',
    response_kind TEXT,
    is_error BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    PRIMARY KEY (session_id, sequence_id),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);
"#;

/// A stored chat session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub state: WorkflowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<VisualizationPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: i64,
}

/// Sidebar entry for a past session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub session_id: String,
    pub first_question: Option<String>,
    pub last_answer: Option<String>,
    pub turn_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
