//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::conversation::ConversationTurn;
use crate::db::Database;
use crate::state_machine::WorkflowState;
use crate::workflow::VisualizationPayload;
use async_trait::async_trait;
use std::sync::Arc;

/// Storage for conversation turns and the visualization slot
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Append a turn to the session
    async fn add_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<(), String>;

    /// Replace the session's visualization
    async fn set_visualization(
        &self,
        session_id: &str,
        payload: &VisualizationPayload,
    ) -> Result<(), String>;
}

/// Storage for engine state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Update the session state (full state as JSON)
    async fn update_state(&self, session_id: &str, state: &WorkflowState) -> Result<(), String>;
}

/// Combined storage trait for convenience
pub trait Storage: TurnStore + StateStore {}
impl<T: TurnStore + StateStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: TurnStore + ?Sized> TurnStore for Arc<T> {
    async fn add_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<(), String> {
        (**self).add_turn(session_id, turn).await
    }

    async fn set_visualization(
        &self,
        session_id: &str,
        payload: &VisualizationPayload,
    ) -> Result<(), String> {
        (**self).set_visualization(session_id, payload).await
    }
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    async fn update_state(&self, session_id: &str, state: &WorkflowState) -> Result<(), String> {
        (**self).update_state(session_id, state).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TurnStore for DatabaseStorage {
    async fn add_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<(), String> {
        self.db
            .add_turn(session_id, turn)
            .map_err(|e| e.to_string())
    }

    async fn set_visualization(
        &self,
        session_id: &str,
        payload: &VisualizationPayload,
    ) -> Result<(), String> {
        self.db
            .set_visualization(session_id, payload)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl StateStore for DatabaseStorage {
    async fn update_state(&self, session_id: &str, state: &WorkflowState) -> Result<(), String> {
        self.db
            .update_session_state(session_id, state)
            .map_err(|e| e.to_string())
    }
}
