use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Evidence;

/// Storage for ephemeral evidence. Reads never return expired records.
#[async_trait]
pub trait EvidenceRepository: Send + Sync {
    async fn insert(&self, evidence: &Evidence) -> DomainResult<()>;

    async fn get(&self, id: Uuid, now: DateTime<Utc>) -> DomainResult<Option<Evidence>>;

    async fn list_by_step(&self, step_id: Uuid, now: DateTime<Utc>) -> DomainResult<Vec<Evidence>>;

    async fn list_by_episode(
        &self,
        episode_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<Evidence>>;

    /// Delete every record whose expiry has passed. Returns the number removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> DomainResult<u64>;
}
