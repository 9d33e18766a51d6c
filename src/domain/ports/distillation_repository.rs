use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Distillation;

/// Canonical rule store. Distillations are never hard-deleted.
#[async_trait]
pub trait DistillationRepository: Send + Sync {
    async fn insert(&self, distillation: &Distillation) -> DomainResult<()>;

    async fn update(&self, distillation: &Distillation) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Distillation>>;

    async fn find_by_fingerprint(&self, fingerprint: &str) -> DomainResult<Option<Distillation>>;

    /// Distillations ordered by confidence, highest first.
    async fn list(
        &self,
        min_confidence: f64,
        include_superseded: bool,
    ) -> DomainResult<Vec<Distillation>>;

    /// Record that an episode has been distilled. Returns `false` when a run
    /// was already recorded.
    async fn record_run(&self, episode_id: Uuid, candidates: u32) -> DomainResult<bool>;

    async fn has_run(&self, episode_id: Uuid) -> DomainResult<bool>;
}
