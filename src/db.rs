//! Database module
//!
//! Provides persistence for sessions and their turns.

mod schema;

pub use schema::*;

use crate::conversation::{ConversationTurn, Role};
use crate::state_machine::WorkflowState;
use crate::workflow::{ResponseKind, VisualizationPayload};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== Session Operations ====================

    /// Create a new idle session
    pub fn create_session(&self, id: &str) -> DbResult<Session> {
        let conn = self.conn()?;
        let now = Utc::now();
        let idle_state = serde_json::to_string(&WorkflowState::Idle)?;

        conn.execute(
            "INSERT INTO sessions (id, state, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id, idle_state, now.to_rfc3339()],
        )?;

        Ok(Session {
            id: id.to_string(),
            state: WorkflowState::Idle,
            visualization: None,
            created_at: now,
            updated_at: now,
            turn_count: 0,
        })
    }

    /// Get session by ID
    pub fn get_session(&self, id: &str) -> DbResult<Session> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.state, s.visualization, s.created_at, s.updated_at,
                    (SELECT COUNT(*) FROM turns t WHERE t.session_id = s.id) AS turn_count
             FROM sessions s WHERE s.id = ?1",
        )?;

        stmt.query_row(params![id], |row| {
            let state_json: String = row.get(1)?;
            let visualization: Option<String> = row.get(2)?;
            Ok(Session {
                id: row.get(0)?,
                state: serde_json::from_str(&state_json).unwrap_or_default(),
                visualization: visualization.and_then(|v| serde_json::from_str(&v).ok()),
                created_at: parse_datetime(&row.get::<_, String>(3)?),
                updated_at: parse_datetime(&row.get::<_, String>(4)?),
                turn_count: row.get(5)?,
            })
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::SessionNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    /// Delete a session and its turns
    pub fn delete_session(&self, id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Persist the engine state
    pub fn update_session_state(&self, id: &str, state: &WorkflowState) -> DbResult<()> {
        let conn = self.conn()?;
        let state_json = serde_json::to_string(state)?;
        let updated = conn.execute(
            "UPDATE sessions SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state_json, Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Replace the visualization shown for a session
    pub fn set_visualization(&self, id: &str, payload: &VisualizationPayload) -> DbResult<()> {
        let conn = self.conn()?;
        let payload_json = serde_json::to_string(payload)?;
        let updated = conn.execute(
            "UPDATE sessions SET visualization = ?1, updated_at = ?2 WHERE id = ?3",
            params![payload_json, Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Reset sessions that were mid-request when the server stopped.
    /// A pause for user input is kept so the prompt can still be answered.
    pub fn reset_busy_to_idle(&self) -> DbResult<usize> {
        let conn = self.conn()?;
        let idle_state = serde_json::to_string(&WorkflowState::Idle)?;
        let reset = conn.execute(
            "UPDATE sessions SET state = ?1, updated_at = ?2
             WHERE json_extract(state, '$.type') NOT IN ('idle', 'awaiting_user_input')",
            params![idle_state, Utc::now().to_rfc3339()],
        )?;
        Ok(reset)
    }

    // ==================== Turn Operations ====================

    /// Append a turn. The caller assigns the sequence id.
    pub fn add_turn(&self, session_id: &str, turn: &ConversationTurn) -> DbResult<()> {
        let conn = self.conn()?;
        let actions = serde_json::to_string(&turn.actions)?;

        conn.execute(
            "INSERT INTO turns (session_id, sequence_id, role, content, actions, response_kind, is_error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                turn.sequence_id,
                turn.role.as_str(),
                turn.content,
                actions,
                turn.response_kind.map(ResponseKind::as_str),
                turn.is_error,
                turn.created_at.to_rfc3339(),
            ],
        )?;

        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![turn.created_at.to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    /// Get turns for a session in order
    pub fn get_turns(&self, session_id: &str) -> DbResult<Vec<ConversationTurn>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sequence_id, role, content, actions, response_kind, is_error, created_at
             FROM turns WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![session_id], parse_turn_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Summaries of sessions with at least one question, most recent first
    pub fn list_history(&self, limit: usize) -> DbResult<Vec<HistorySummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.created_at, s.updated_at,
                    (SELECT t.content FROM turns t
                      WHERE t.session_id = s.id AND t.role = 'user'
                      ORDER BY t.sequence_id ASC LIMIT 1) AS first_question,
                    (SELECT t.content FROM turns t
                      WHERE t.session_id = s.id AND t.role = 'assistant' AND t.is_error = 0
                        AND t.sequence_id > (SELECT MIN(u.sequence_id) FROM turns u
                                              WHERE u.session_id = s.id AND u.role = 'user')
                      ORDER BY t.sequence_id DESC LIMIT 1) AS last_answer,
                    (SELECT COUNT(*) FROM turns t WHERE t.session_id = s.id) AS turn_count
             FROM sessions s
             WHERE EXISTS (SELECT 1 FROM turns t WHERE t.session_id = s.id AND t.role = 'user')
             ORDER BY s.updated_at DESC
             LIMIT ?1",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok(HistorySummary {
                session_id: row.get(0)?,
                created_at: parse_datetime(&row.get::<_, String>(1)?),
                updated_at: parse_datetime(&row.get::<_, String>(2)?),
                first_question: row.get(3)?,
                last_answer: row.get(4)?,
                turn_count: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Whether a session row exists
    pub fn session_exists(&self, id: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

/// Parse a turn row from the database
fn parse_turn_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let role: String = row.get(1)?;
    let actions: String = row.get(3)?;
    let response_kind: Option<String> = row.get(4)?;

    Ok(ConversationTurn {
        sequence_id: row.get(0)?,
        role: Role::parse(&role).unwrap_or(Role::Assistant),
        content: row.get(2)?,
        actions: serde_json::from_str(&actions).unwrap_or_default(),
        response_kind: response_kind.as_deref().map(ResponseKind::parse),
        is_error: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
