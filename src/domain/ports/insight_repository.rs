use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Insight;

#[async_trait]
pub trait InsightRepository: Send + Sync {
    async fn insert(&self, insight: &Insight) -> DomainResult<()>;

    async fn update(&self, insight: &Insight) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Insight>>;

    /// Number of stored insights sharing a text fingerprint.
    async fn count_fingerprint(&self, fingerprint: &str) -> DomainResult<u32>;

    async fn list(&self, durable_only: bool) -> DomainResult<Vec<Insight>>;

    /// Delete expired ephemeral insights, returning their ids.
    async fn delete_expired(&self, now: DateTime<Utc>) -> DomainResult<Vec<Uuid>>;
}
