pub mod distillation;
pub mod embedding_index;
pub mod event_bus;
pub mod event_worker;
pub mod evidence_store;
pub mod governor;
pub mod guardrails;
pub mod importance_gate;
pub mod keyed_lock;
pub mod maintenance_daemon;
pub mod policy_service;
pub mod retrieval;
pub mod trigger_rules;

pub use distillation::{DistillationEngine, DistillationReport};
pub use embedding_index::EmbeddingIndex;
pub use event_bus::{EventSeverity, GovernanceEvent, GovernanceEventBus, GovernancePayload, SequenceNumber};
pub use event_worker::{BatchReport, EventWorker, WorkerHandle, WorkerStatus};
pub use evidence_store::{EvidenceStore, SweepReport};
pub use governor::{CloseReport, Governor, GovernorStores, StepHandle, StepReport};
pub use guardrails::{Guardrail, GuardrailContext, GuardrailEngine, GuardrailOutcome, GuardrailResult};
pub use importance_gate::{GateDecision, ImportanceGate};
pub use keyed_lock::KeyedLocks;
pub use maintenance_daemon::{DaemonHandle, MaintenanceConfig, MaintenanceDaemon, MaintenanceReport};
pub use policy_service::PolicyService;
pub use retrieval::RetrievalEngine;
pub use trigger_rules::{TriggerMatch, TriggerRule, TriggerRuleEngine};
