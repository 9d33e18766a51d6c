//! Step domain model: one governed action and its decision packet.
//!
//! Pre-action fields live in [`DecisionPacket`]; post-action fields live in
//! [`StepOutcome`], which stays `None` until the step completes and is written
//! exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::{ActionDescriptor, Evaluation, OutcomeClass};
use super::evidence::EvidenceInput;
use super::phase::{ActionCategory, Phase};
use crate::domain::errors::{DomainError, DomainResult};

/// Maximum length of a synthesized lesson.
pub const MAX_LESSON_CHARS: usize = 240;

/// A falsifiable prediction about the action's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub statement: String,
    pub expected: OutcomeClass,
}

impl Prediction {
    pub fn new(statement: impl Into<String>, expected: OutcomeClass) -> Self {
        Self {
            statement: statement.into(),
            expected,
        }
    }

    pub fn is_falsifiable(&self) -> bool {
        !self.statement.trim().is_empty()
    }
}

/// How the step acknowledges memory surfaced by retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryAcknowledgement {
    /// Nothing acknowledged
    #[default]
    None,
    /// The step builds on these memory ids
    Cited { ids: Vec<Uuid> },
    /// The caller reviewed these ids and judged none relevant
    NoneRelevant { reviewed: Vec<Uuid> },
}

/// Pre-action record supplied by the caller when beginning a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPacket {
    pub intent: String,
    pub action: ActionDescriptor,
    #[serde(default)]
    pub rejected_alternatives: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub prediction: Prediction,
    /// Stated confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub memory: MemoryAcknowledgement,
}

impl DecisionPacket {
    pub fn new(
        intent: impl Into<String>,
        action: ActionDescriptor,
        prediction: Prediction,
        confidence: f64,
    ) -> Self {
        Self {
            intent: intent.into(),
            action,
            rejected_alternatives: Vec::new(),
            assumptions: Vec::new(),
            prediction,
            confidence,
            memory: MemoryAcknowledgement::None,
        }
    }

    pub fn citing(mut self, ids: Vec<Uuid>) -> Self {
        self.memory = MemoryAcknowledgement::Cited { ids };
        self
    }

    pub fn declaring_none_relevant(mut self, reviewed: Vec<Uuid>) -> Self {
        self.memory = MemoryAcknowledgement::NoneRelevant { reviewed };
        self
    }

    pub fn cited_memory(&self) -> &[Uuid] {
        match &self.memory {
            MemoryAcknowledgement::Cited { ids } => ids,
            _ => &[],
        }
    }

    pub fn memory_cited(&self) -> bool {
        !self.cited_memory().is_empty()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.intent.trim().is_empty() {
            return Err(DomainError::ValidationFailed("intent must not be empty".into()));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(DomainError::ValidationFailed(format!(
                "confidence {} is outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// What the caller observed after running the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Observation {
    pub summary: String,
    /// Observed outcome class; required to evaluate the step
    #[serde(default)]
    pub outcome: Option<OutcomeClass>,
    #[serde(default)]
    pub error: Option<String>,
    /// Whether any observable state changed
    #[serde(default)]
    pub state_changed: bool,
    #[serde(default)]
    pub evidence: Vec<EvidenceInput>,
    #[serde(default)]
    pub lesson: Option<String>,
    #[serde(default)]
    pub validation_method: Option<String>,
    /// Caller flag: this step unblocked something
    #[serde(default)]
    pub unblocked: bool,
    /// Id of the event reporting this observation, when it came off the queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl Observation {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            outcome: Some(OutcomeClass::Success),
            ..Default::default()
        }
    }

    pub fn failure(summary: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            outcome: Some(OutcomeClass::Failure),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn partial(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            outcome: Some(OutcomeClass::Partial),
            ..Default::default()
        }
    }

    pub fn with_state_change(mut self) -> Self {
        self.state_changed = true;
        self
    }

    pub fn with_evidence(mut self, evidence: EvidenceInput) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn with_lesson(mut self, lesson: impl Into<String>) -> Self {
        self.lesson = Some(lesson.into());
        self
    }

    pub fn with_validation(mut self, method: impl Into<String>) -> Self {
        self.validation_method = Some(method.into());
        self
    }
}

/// Terminal marker for steps that did not complete normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    TimedOut,
    Cancelled,
}

/// Post-action record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub observed: String,
    pub outcome: OutcomeClass,
    pub evaluation: Evaluation,
    /// Normalized prediction/outcome divergence in [0, 1]
    pub surprise: f64,
    pub lesson: String,
    pub confidence_after: f64,
    pub validation_method: Option<String>,
    pub validated: bool,
    pub state_changed: bool,
    pub new_information: bool,
    pub error_signature: Option<String>,
    pub evidence_ids: Vec<Uuid>,
    pub unblocked: bool,
    pub termination: Option<Termination>,
    /// Event that delivered this outcome, for redelivery detection
    #[serde(default)]
    pub completion_event_id: Option<String>,
}

/// One governed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub episode_id: Uuid,
    /// 1-based position within the episode
    pub sequence: u32,
    /// Phase in which the step began
    pub phase: Phase,
    pub packet: DecisionPacket,
    pub outcome: Option<StepOutcome>,
    /// Raw event that opened the step, for idempotent redelivery
    pub source_event_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(
        episode_id: Uuid,
        sequence: u32,
        phase: Phase,
        packet: DecisionPacket,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            episode_id,
            sequence,
            phase,
            packet,
            outcome: None,
            source_event_id: None,
            started_at,
            deadline,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn category(&self) -> ActionCategory {
        self.packet.action.effective_category()
    }

    pub fn target(&self) -> Option<&str> {
        self.packet.action.target.as_deref()
    }

    pub fn evaluation(&self) -> Option<Evaluation> {
        self.outcome.as_ref().map(|o| o.evaluation)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed() && now >= self.deadline
    }

    /// A completed mutation whose observed outcome was a failure.
    pub fn is_failed_mutation(&self) -> bool {
        self.category().is_mutating()
            && self
                .outcome
                .as_ref()
                .is_some_and(|o| o.outcome == OutcomeClass::Failure)
    }

    /// Write the post-action record. A step is never evaluated twice.
    pub fn complete(&mut self, outcome: StepOutcome, at: DateTime<Utc>) -> DomainResult<()> {
        if self.is_completed() {
            return Err(DomainError::InvalidStateTransition {
                from: "completed".to_string(),
                to: "completed".to_string(),
                reason: format!("step {} has already been evaluated", self.id),
            });
        }
        self.outcome = Some(outcome);
        self.completed_at = Some(at);
        Ok(())
    }
}

/// Normalize an error message into a signature: lowercase, collapsed
/// whitespace, digit runs replaced by `#`.
pub fn error_signature(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut last_space = false;
    let mut last_digit = false;
    for ch in message.trim().chars() {
        if ch.is_ascii_digit() {
            if !last_digit {
                out.push('#');
            }
            last_digit = true;
            last_space = false;
        } else if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
            last_digit = false;
        } else {
            out.extend(ch.to_lowercase());
            last_space = false;
            last_digit = false;
        }
    }
    out
}

/// Short lesson naming intent, expectation and observation.
pub fn synthesize_lesson(packet: &DecisionPacket, observed: &str, evaluation: Evaluation) -> String {
    let lesson = match evaluation {
        Evaluation::Pass => format!(
            "{}: prediction held ({})",
            packet.intent.trim(),
            packet.prediction.statement.trim()
        ),
        Evaluation::Partial | Evaluation::Fail => format!(
            "{}: expected {} but observed {}",
            packet.intent.trim(),
            packet.prediction.statement.trim(),
            observed.trim()
        ),
    };
    truncate_chars(&lesson, MAX_LESSON_CHARS)
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
