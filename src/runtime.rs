//! Runtime for executing chat sessions
//!
//! One task per session owns the continuation engine state. The manager
//! starts runtimes on demand and hands out channels to the API layer.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;
pub use traits::*;

use crate::config::RetryPolicy;
use crate::conversation::{ConversationAccumulator, ConversationUpdate, NewTurn};
use crate::db::{Database, Session};
use crate::state_machine::{Event, WorkflowContext};
use crate::workflow::WorkflowClient;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = ConversationRuntime<DatabaseStorage, dyn WorkflowClient>;

const EVENT_CHANNEL_CAPACITY: usize = 32;
const BROADCAST_CHANNEL_CAPACITY: usize = 128;

/// Manager for all session runtimes
pub struct RuntimeManager {
    db: Database,
    client: Arc<dyn WorkflowClient>,
    retry: RetryPolicy,
    greeting: String,
    runtimes: RwLock<HashMap<String, SessionHandle>>,
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    shutdown: CancellationToken,
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        session: serde_json::Value,
        turns: Vec<serde_json::Value>,
        busy: bool,
        last_sequence_id: i64,
    },
    Turn {
        turn: serde_json::Value,
    },
    Visualization {
        payload: serde_json::Value,
    },
    StateChange {
        /// Full state as JSON object (e.g., `{"type":"awaiting_user_input","pointer":{...}}`)
        state: serde_json::Value,
    },
    Notice {
        data: serde_json::Value,
    },
    Error {
        message: String,
    },
}

impl From<ConversationUpdate> for SseEvent {
    fn from(update: ConversationUpdate) -> Self {
        match update {
            ConversationUpdate::TurnAppended(turn) => SseEvent::Turn {
                turn: serde_json::to_value(&turn).unwrap_or(serde_json::Value::Null),
            },
            ConversationUpdate::VisualizationChanged(payload) => SseEvent::Visualization {
                payload: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
            },
        }
    }
}

impl RuntimeManager {
    pub fn new(
        db: Database,
        client: Arc<dyn WorkflowClient>,
        retry: RetryPolicy,
        greeting: impl Into<String>,
    ) -> Self {
        Self {
            db,
            client,
            retry,
            greeting: greeting.into(),
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session whose conversation starts with the greeting
    pub fn create_session(&self) -> Result<Session, String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db.create_session(&id).map_err(|e| e.to_string())?;

        let greeting = NewTurn::greeting(&self.greeting).into_turn(1, Utc::now());
        self.db
            .add_turn(&id, &greeting)
            .map_err(|e| e.to_string())?;

        tracing::info!(session_id = %id, "Created session");
        self.db.get_session(&id).map_err(|e| e.to_string())
    }

    /// Get or create a runtime for a session
    pub async fn get_or_create(&self, session_id: &str) -> Result<SessionHandle, String> {
        // Check if already running
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(session_id) {
                return Ok(handle.clone());
            }
        }

        let mut runtimes = self.runtimes.write().await;
        // Another caller may have started it while we waited for the lock
        if let Some(handle) = runtimes.get(session_id) {
            return Ok(handle.clone());
        }

        let session = self.db.get_session(session_id).map_err(|e| e.to_string())?;
        let turns = self.db.get_turns(session_id).map_err(|e| e.to_string())?;

        // In-flight work cannot survive a restart; a pause for user input can
        let initial_state = session.state.clone().after_restart();
        if initial_state != session.state {
            self.db
                .update_session_state(session_id, &initial_state)
                .map_err(|e| e.to_string())?;
        }
        let conversation = ConversationAccumulator::restore(turns, session.visualization);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let handle = SessionHandle {
            event_tx: event_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
            shutdown: shutdown.clone(),
        };

        let runtime: ProductionRuntime = ConversationRuntime::new(
            WorkflowContext::new(session_id, self.retry),
            initial_state,
            DatabaseStorage::new(self.db.clone()),
            self.client.clone(),
            conversation,
            event_rx,
            event_tx,
            broadcast_tx,
        )
        .with_shutdown(shutdown);

        // Start runtime in background
        let id = session_id.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(session_id = %id, "Session runtime finished");
        });

        runtimes.insert(session_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Send an event to a session
    pub async fn send_event(&self, session_id: &str, event: Event) -> Result<(), String> {
        let handle = self.get_or_create(session_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Subscribe to a session's events, conversation updates included
    pub async fn subscribe(&self, session_id: &str) -> Result<broadcast::Receiver<SseEvent>, String> {
        let handle = self.get_or_create(session_id).await?;
        Ok(handle.broadcast_tx.subscribe())
    }

    /// Stop a session's runtime, aborting anything in flight. Returns
    /// whether a runtime was running.
    pub async fn close(&self, session_id: &str) -> bool {
        let handle = self.runtimes.write().await.remove(session_id);
        match handle {
            Some(handle) => {
                handle.shutdown.cancel();
                tracing::info!(session_id = %session_id, "Closed session runtime");
                true
            }
            None => false,
        }
    }

    /// Stop the runtime and remove the session with its turns
    pub async fn delete(&self, session_id: &str) -> Result<(), String> {
        self.close(session_id).await;
        self.db
            .delete_session(session_id)
            .map_err(|e| e.to_string())
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get the workflow client
    pub fn client(&self) -> &Arc<dyn WorkflowClient> {
        &self.client
    }
}
