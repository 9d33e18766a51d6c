//! Raw action events consumed from the event queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::{ActionDescriptor, OutcomeClass};
use super::evidence::EvidenceInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawEventKind {
    ToolStart,
    ToolSuccess,
    ToolFailure,
    Note,
}

impl RawEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolStart => "tool_start",
            Self::ToolSuccess => "tool_success",
            Self::ToolFailure => "tool_failure",
            Self::Note => "note",
        }
    }
}

/// Optional outcome fields carried by success/failure events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawOutcome {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub outcome: Option<OutcomeClass>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub state_changed: bool,
    #[serde(default)]
    pub evidence: Vec<EvidenceInput>,
    #[serde(default)]
    pub lesson: Option<String>,
    #[serde(default)]
    pub validation_method: Option<String>,
    /// Id of the tool_start event this completion answers
    #[serde(default)]
    pub start_event_id: Option<String>,
}

/// A single event from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Producer-assigned id; redeliveries carry the same id
    pub event_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RawEventKind,
    #[serde(default)]
    pub action: Option<ActionDescriptor>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub outcome: Option<RawOutcome>,
}

impl RawEvent {
    pub fn new(session_id: impl Into<String>, kind: RawEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            kind,
            action: None,
            payload: serde_json::Value::Null,
            outcome: None,
        }
    }

    pub fn with_action(mut self, action: ActionDescriptor) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_outcome(mut self, outcome: RawOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

/// Decision fields a `tool_start` payload may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StartPayload {
    pub goal: Option<String>,
    pub success_criterion: Option<String>,
    pub intent: Option<String>,
    pub prediction: Option<String>,
    pub expected: Option<OutcomeClass>,
    pub confidence: Option<f64>,
    pub alternatives: Vec<String>,
    pub assumptions: Vec<String>,
    pub cite: Vec<Uuid>,
    pub none_relevant: Option<Vec<Uuid>>,
}

/// Fields a `note` payload may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotePayload {
    pub text: Option<String>,
    /// Requested phase transition
    pub phase: Option<String>,
    /// Close the episode: `succeeded` or `aborted`
    pub close: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Leased,
    Done,
    Dead,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "done" => Some(Self::Done),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A raw event as held by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// Append order
    pub seq: i64,
    pub event: RawEvent,
    pub status: QueueStatus,
    pub attempts: u32,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_from_json_line() {
        let line = r#"{"event_id":"e1","session_id":"s","timestamp":"2026-01-01T00:00:00Z","kind":"tool_start","action":{"tool":"Edit","target":"a.rs"},"payload":{"intent":"fix","confidence":0.6}}"#;
        let event: RawEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind, RawEventKind::ToolStart);
        let payload: StartPayload = serde_json::from_value(event.payload).unwrap();
        assert_eq!(payload.intent.as_deref(), Some("fix"));
        assert!(payload.cite.is_empty());
    }
}
