//! Port trait definitions (Hexagonal Architecture)
//!
//! Async interfaces the governance core depends on. Adapters implement them;
//! every component receives its stores as explicit `Arc<dyn Port>`
//! dependencies.

pub mod distillation_repository;
pub mod embedding;
pub mod episode_repository;
pub mod event_queue;
pub mod evidence_repository;
pub mod insight_repository;
pub mod null_embedding;
pub mod policy_repository;
pub mod trigger_rule_repository;
pub mod vector_store;

pub use distillation_repository::DistillationRepository;
pub use embedding::{cosine_similarity, EmbeddingInput, EmbeddingOutput, EmbeddingProvider};
pub use episode_repository::EpisodeRepository;
pub use event_queue::EventQueue;
pub use evidence_repository::EvidenceRepository;
pub use insight_repository::InsightRepository;
pub use null_embedding::NullEmbeddingProvider;
pub use policy_repository::PolicyRepository;
pub use trigger_rule_repository::TriggerRuleRepository;
pub use vector_store::{VectorMatch, VectorStore};
