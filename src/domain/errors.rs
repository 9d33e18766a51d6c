//! Domain errors for the Praxis governance core.
//!
//! Two layers:
//! - [`DomainError`]: storage, validation and lookup failures raised by models,
//!   ports and adapters.
//! - [`GovernanceError`]: the caller-facing taxonomy returned by the governor.
//!   Every variant carries a concrete remediation hint.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{ActionCategory, GuardrailBlock, Phase};

/// Domain-level errors that can occur in the Praxis system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Episode not found: {0}")]
    EpisodeNotFound(Uuid),

    #[error("Step not found: {0}")]
    StepNotFound(Uuid),

    #[error("Distillation not found: {0}")]
    DistillationNotFound(Uuid),

    #[error("Policy not found: {0}")]
    PolicyNotFound(Uuid),

    #[error("Insight not found: {0}")]
    InsightNotFound(Uuid),

    #[error("Trigger rule not found: {0}")]
    TriggerRuleNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Errors surfaced to the action layer when it drives an episode.
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Action category '{category}' is not permitted in phase {phase}; requires {required}")]
    PhaseViolation {
        phase: Phase,
        category: ActionCategory,
        required: Phase,
    },

    #[error("Blocked by {}: {}", .0.guardrail, .0.reason)]
    GuardrailBlocked(GuardrailBlock),

    #[error("Budget exhausted for episode {episode_id}: {detail}")]
    BudgetExhausted { episode_id: Uuid, detail: String },

    #[error("Step {step_id} cannot be evaluated: missing {missing}")]
    EvaluationMissing { step_id: Uuid, missing: String },

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Canonical storage write failed for episode {episode_id}: {reason}")]
    StorageWriteFailure { episode_id: Uuid, reason: String },

    #[error("Episode not found: {0}")]
    EpisodeNotFound(Uuid),

    #[error("Episode {0} is closed")]
    EpisodeClosed(Uuid),

    #[error("Step not found: {0}")]
    StepNotFound(Uuid),

    #[error("Step {0} is still in progress")]
    StepInProgress(Uuid),

    #[error("Step {0} has already been evaluated")]
    StepAlreadyCompleted(Uuid),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl GovernanceError {
    /// Specific next action the caller should take.
    pub fn remediation(&self) -> String {
        match self {
            Self::PhaseViolation { required, .. } => {
                format!("transition to {required} before attempting this action")
            }
            Self::GuardrailBlocked(block) => block.remediation.hint(),
            Self::BudgetExhausted { .. } => {
                "episode is in ESCALATE; obtain approval to extend the budget or close the episode"
                    .to_string()
            }
            Self::EvaluationMissing { missing, .. } => {
                format!("supply {missing} before completing the step")
            }
            Self::RetrievalUnavailable(_) => {
                "continue with trigger-rule advice only; semantic recall is degraded".to_string()
            }
            Self::StorageWriteFailure { .. } => {
                "outcome is held in memory; persistence will be retried".to_string()
            }
            Self::EpisodeNotFound(_) | Self::EpisodeClosed(_) => {
                "open a new episode for further work".to_string()
            }
            Self::StepNotFound(_) => "begin a step before completing it".to_string(),
            Self::StepInProgress(_) => {
                "complete or time out the in-flight step before beginning another".to_string()
            }
            Self::StepAlreadyCompleted(_) => {
                "completed steps are immutable; begin a new step to supersede it".to_string()
            }
            Self::InvalidTransition { from, .. } => format!(
                "allowed targets from {from}: {}",
                from.allowed_transitions()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::Domain(_) => "inspect the underlying error".to_string(),
        }
    }

    /// Whether the caller can re-submit after remediation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PhaseViolation { .. }
                | Self::GuardrailBlocked(_)
                | Self::RetrievalUnavailable(_)
                | Self::StorageWriteFailure { .. }
                | Self::StepInProgress(_)
                | Self::InvalidTransition { .. }
        )
    }
}

pub type GovernanceResult<T> = Result<T, GovernanceError>;
