//! Response classifier
//!
//! Maps one frame onto at most one assistant reply, one visualization and
//! one continuation pointer.

use super::record::{Action, WorkflowFrame};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const VISUALIZATION_TYPE: &str = "visualization";
const INTERACTIVE_WAIT: &str = "interactive";

/// Transient acknowledgements the backend sends while a workflow is still
/// running. Matched case-insensitively anywhere in `message`.
const PLACEHOLDER_PHRASES: &[&str] = &[
    "workflow was started",
    "workflow is executing",
    "please wait",
];

/// Informational kind of an assistant turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    #[default]
    Answer,
    Status,
    Followup,
}

impl ResponseKind {
    fn from_declared(kind: Option<&str>) -> Self {
        match kind {
            Some("status") => Self::Status,
            Some("followup") => Self::Followup,
            _ => Self::Answer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Status => "status",
            Self::Followup => "followup",
        }
    }

    pub fn parse(s: &str) -> Self {
        Self::from_declared(Some(s))
    }
}

/// Whether the engine resumes the workflow itself or waits for the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
    Automatic,
    Interactive,
}

/// Single-use reference that advances a paused workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationPointer {
    pub url: String,
    pub wait_mode: WaitMode,
}

/// Embedded chart or table to show beside the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationPayload {
    pub embed_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Displayable assistant content extracted from a frame
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub text: String,
    pub kind: ResponseKind,
    pub actions: Vec<Action>,
}

/// Outcome of classifying one frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classification {
    pub reply: Option<AssistantReply>,
    pub visualization: Option<VisualizationPayload>,
    pub pointer: Option<ContinuationPointer>,
    /// The frame only acknowledged that work is in progress
    pub placeholder: bool,
}

pub fn classify(frame: &WorkflowFrame) -> Classification {
    if is_placeholder(frame) {
        return Classification {
            placeholder: true,
            ..Classification::default()
        };
    }

    let visualization = frame.embed_url.as_ref().map(|url| VisualizationPayload {
        embed_reference: url.clone(),
        title: frame.card_name.clone(),
        source_query: frame.sql_query.clone(),
        source_id: frame.card_id.clone(),
        data: frame.data.clone(),
    });

    let reply = if frame.kind.as_deref() == Some(VISUALIZATION_TYPE) {
        None
    } else {
        frame.text().map(|text| AssistantReply {
            text: text.to_string(),
            kind: ResponseKind::from_declared(frame.kind.as_deref()),
            actions: frame.actions.clone().unwrap_or_default(),
        })
    };

    let pointer = frame.resume_url.as_ref().map(|url| ContinuationPointer {
        url: url.clone(),
        wait_mode: wait_mode(frame),
    });

    Classification {
        reply,
        visualization,
        pointer,
        placeholder: false,
    }
}

/// Explicit `waitType` wins. Without it, anything that shows content to the
/// user is treated as waiting for them.
pub fn wait_mode(frame: &WorkflowFrame) -> WaitMode {
    if let Some(wait_type) = &frame.wait_type {
        return if wait_type == INTERACTIVE_WAIT {
            WaitMode::Interactive
        } else {
            WaitMode::Automatic
        };
    }

    let has_actions = frame.actions.as_ref().is_some_and(|a| !a.is_empty());
    let shows_content = frame.message.is_some()
        || frame.has_chart
        || frame.has_table
        || frame.embed_url.is_some();

    if has_actions || shows_content {
        WaitMode::Interactive
    } else {
        WaitMode::Automatic
    }
}

pub fn is_placeholder(frame: &WorkflowFrame) -> bool {
    let Some(message) = &frame.message else {
        return false;
    };
    let message = message.to_lowercase();

    PLACEHOLDER_PHRASES.iter().any(|p| message.contains(p))
        && frame.kind.is_none()
        && frame.actions.is_none()
        && frame.embed_url.is_none()
        && frame.wait_type.as_deref() != Some(INTERACTIVE_WAIT)
}
