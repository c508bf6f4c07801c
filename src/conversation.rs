//! Conversation accumulator
//!
//! Owns the append-only turn list and the visualization slot of one
//! session, and publishes every change to its subscribers.

use crate::workflow::{Action, AssistantReply, ResponseKind, VisualizationPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const ERROR_TEXT: &str = "Sorry, I encountered an error processing your message. Please try again.";
const UPDATE_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A recorded turn. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub sequence_id: i64,
    pub role: Role,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_kind: Option<ResponseKind>,
    #[serde(default)]
    pub is_error: bool,
}

impl ConversationTurn {
    /// An assistant turn presenting choices
    #[allow(dead_code)] // Used in tests
    pub fn is_waiting(&self) -> bool {
        self.role == Role::Assistant && !self.actions.is_empty()
    }
}

/// A turn before it is assigned its place in the list
#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub role: Role,
    pub content: Option<String>,
    pub actions: Vec<Action>,
    pub response_kind: Option<ResponseKind>,
    pub is_error: bool,
}

impl NewTurn {
    pub fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            content: Some(text.to_string()),
            actions: Vec::new(),
            response_kind: None,
            is_error: false,
        }
    }

    pub fn assistant(reply: AssistantReply) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(reply.text),
            actions: reply.actions,
            response_kind: Some(reply.kind),
            is_error: false,
        }
    }

    /// The single synthetic turn shown for a failed request
    pub fn error() -> Self {
        Self {
            role: Role::Assistant,
            content: Some(ERROR_TEXT.to_string()),
            actions: Vec::new(),
            response_kind: None,
            is_error: true,
        }
    }

    pub fn greeting(text: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.to_string()),
            actions: Vec::new(),
            response_kind: Some(ResponseKind::Answer),
            is_error: false,
        }
    }

    pub fn into_turn(self, sequence_id: i64, created_at: DateTime<Utc>) -> ConversationTurn {
        ConversationTurn {
            sequence_id,
            role: self.role,
            content: self.content,
            created_at,
            actions: self.actions,
            response_kind: self.response_kind,
            is_error: self.is_error,
        }
    }
}

/// Change published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationUpdate {
    TurnAppended(ConversationTurn),
    VisualizationChanged(VisualizationPayload),
}

/// Grouped projection of the turn list for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayView {
    /// Turns before the first user turn (the greeting)
    pub standalone: Vec<ConversationTurn>,
    pub groups: Vec<TurnGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnGroup {
    pub question: ConversationTurn,
    pub answers: Vec<ConversationTurn>,
}

/// Every user turn opens a group; assistant turns join the latest group.
pub fn group_turns(turns: &[ConversationTurn]) -> DisplayView {
    let mut view = DisplayView {
        standalone: Vec::new(),
        groups: Vec::new(),
    };

    for turn in turns {
        match (turn.role, view.groups.last_mut()) {
            (Role::User, _) => view.groups.push(TurnGroup {
                question: turn.clone(),
                answers: Vec::new(),
            }),
            (Role::Assistant, Some(group)) => group.answers.push(turn.clone()),
            (Role::Assistant, None) => view.standalone.push(turn.clone()),
        }
    }

    view
}

/// Append-only turn list plus the current visualization
pub struct ConversationAccumulator {
    turns: Vec<ConversationTurn>,
    visualization: Option<VisualizationPayload>,
    updates: broadcast::Sender<ConversationUpdate>,
}

impl Default for ConversationAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationAccumulator {
    pub fn new() -> Self {
        Self::restore(Vec::new(), None)
    }

    /// Rebuild from persisted turns
    pub fn restore(turns: Vec<ConversationTurn>, visualization: Option<VisualizationPayload>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            turns,
            visualization,
            updates,
        }
    }

    /// Record a turn, assigning the next sequence id
    #[allow(dead_code)] // Used in tests
    pub fn append(&mut self, turn: NewTurn) -> &ConversationTurn {
        let turn = turn.into_turn(self.next_sequence_id(), Utc::now());
        self.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    /// Record a turn whose id and timestamp were assigned by storage
    pub fn push(&mut self, turn: ConversationTurn) {
        // No receivers is fine
        let _ = self.updates.send(ConversationUpdate::TurnAppended(turn.clone()));
        self.turns.push(turn);
    }

    pub fn next_sequence_id(&self) -> i64 {
        self.turns.last().map_or(1, |t| t.sequence_id + 1)
    }

    pub fn show_visualization(&mut self, payload: VisualizationPayload) {
        let _ = self
            .updates
            .send(ConversationUpdate::VisualizationChanged(payload.clone()));
        self.visualization = Some(payload);
    }

    #[allow(dead_code)] // Used in tests
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    #[allow(dead_code)] // Used in tests
    pub fn visualization(&self) -> Option<&VisualizationPayload> {
        self.visualization.as_ref()
    }

    #[allow(dead_code)] // Used in tests
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationUpdate> {
        self.updates.subscribe()
    }

    #[allow(dead_code)] // Used in tests
    pub fn view(&self) -> DisplayView {
        group_turns(&self.turns)
    }
}
