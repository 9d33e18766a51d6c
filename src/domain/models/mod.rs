pub mod action;
pub mod advice;
pub mod config;
pub mod distillation;
pub mod episode;
pub mod event;
pub mod evidence;
pub mod guardrail;
pub mod insight;
pub mod phase;
pub mod policy;
pub mod step;

pub use action::{infer_category, ActionDescriptor, Evaluation, OutcomeClass};
pub use advice::{AdviceItem, AdviceResponse, AdviceSource, PrecisionMode, Priority};
pub use config::{
    BudgetConfig, Config, DatabaseConfig, DistillationConfig, EmbeddingConfig, EvidenceConfig,
    FusionWeights, GateConfig, GateWeights, GuardrailConfig, LearningConfig, LoggingConfig,
    PersistenceConfig, RetentionHours, RetrievalConfig, WorkerConfig, DEFAULT_GUARDRAIL_ORDER,
};
pub use distillation::{
    Distillation, DistillationCandidate, DistillationStatus, DistillationType, OutcomeDirection,
};
pub use episode::{
    Budget, CompletionRecord, Episode, EpisodeStatus, PhaseTransition, TerminalOutcome,
    TransitionTrigger,
};
pub use event::{
    NotePayload, QueueStatus, QueuedEvent, RawEvent, RawEventKind, RawOutcome, StartPayload,
};
pub use evidence::{DiagnosticKind, Evidence, EvidenceInput, EvidenceKind, EvidenceRef};
pub use guardrail::{GuardrailBlock, Remediation};
pub use insight::{ImportanceSignals, Insight, InsightKind, Retention};
pub use phase::{ActionCategory, Phase};
pub use policy::{Policy, PolicyForbid, PolicyOrigin, PolicyStatus};
pub use step::{
    DecisionPacket, MemoryAcknowledgement, Observation, Prediction, Step, StepOutcome, Termination,
};
