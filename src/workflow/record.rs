//! Canonical frame record
//!
//! The workflow backend has emitted several spellings of the same fields
//! over time (`embedUrl`/`embed_url`, `resumeUrl`/`resume_url`, ...). They are
//! folded into [`WorkflowFrame`] here and nowhere else.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_ACTION_LABEL: &str = "Action selected";

/// One decoded response frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowFrame {
    /// Declared `type` (`answer`, `status`, `followup`, `visualization`, ...)
    pub kind: Option<String>,
    pub message: Option<String>,
    pub answer: Option<String>,
    /// `None` when the field is absent; an empty list is still "present"
    pub actions: Option<Vec<Action>>,
    pub embed_url: Option<String>,
    pub resume_url: Option<String>,
    pub wait_type: Option<String>,
    pub card_id: Option<String>,
    pub card_name: Option<String>,
    pub sql_query: Option<String>,
    pub data: Option<Value>,
    pub has_chart: bool,
    pub has_table: bool,
}

impl WorkflowFrame {
    /// Normalize a raw JSON value. Only objects are frames.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(map) = value else {
            return None;
        };

        Some(Self {
            kind: string_field(&map, &["type"]),
            message: text_field(&map, "message"),
            answer: text_field(&map, "answer"),
            actions: map
                .get("actions")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Action::from_value).collect()),
            embed_url: string_field(&map, &["embedUrl", "embed_url"]),
            resume_url: string_field(&map, &["resumeUrl", "resume_url"]),
            wait_type: string_field(&map, &["waitType", "wait_type"]),
            card_id: scalar_field(&map, &["cardId", "card_id"]),
            card_name: string_field(&map, &["cardName", "card_name"]),
            sql_query: string_field(&map, &["sqlQuery", "sql_query"]),
            data: map.get("data").filter(|v| !v.is_null()).cloned(),
            has_chart: is_truthy(map.get("chart")),
            has_table: is_truthy(map.get("table")),
        })
    }

    /// Displayable text: `message`, falling back to `answer`
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref().or(self.answer.as_deref())
    }
}

/// A choice presented alongside an assistant turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub label: String,
    /// Sent back to the backend verbatim when the action is chosen
    pub payload: Value,
}

impl Action {
    /// Build an action from its wire form.
    ///
    /// Some workflows stringify the real payload into a `value` field; when
    /// that string parses as JSON the parsed value is the payload, otherwise
    /// the whole action object is.
    pub fn from_value(raw: &Value) -> Option<Self> {
        match raw {
            Value::Object(map) => {
                let label = string_field(map, &["label", "text"])
                    .unwrap_or_else(|| DEFAULT_ACTION_LABEL.to_string());
                let payload = map
                    .get("value")
                    .and_then(Value::as_str)
                    .and_then(|s| serde_json::from_str::<Value>(s).ok())
                    .unwrap_or_else(|| raw.clone());
                Some(Self { label, payload })
            }
            Value::String(s) if !s.is_empty() => Some(Self {
                label: s.clone(),
                payload: raw.clone(),
            }),
            _ => None,
        }
    }

    /// Legacy `{"type": "button", "payload": "<text>"}` actions are re-sent
    /// as a plain message when there is no prompt waiting for them.
    pub fn button_text(&self) -> Option<&str> {
        let object = self.payload.as_object()?;
        if object.get("type").and_then(Value::as_str) != Some("button") {
            return None;
        }
        object
            .get("payload")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
    }
}

/// First non-empty string among `keys`
fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Like [`string_field`] but numbers are accepted too
fn scalar_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| match map.get(*key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .next()
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    scalar_field(map, &[key])
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}
