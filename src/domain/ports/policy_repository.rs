use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Policy, PolicyStatus};

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn create(&self, policy: &Policy) -> DomainResult<()>;

    async fn update(&self, policy: &Policy) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Policy>>;

    /// Policies ordered by priority, highest first.
    async fn list(&self, status: Option<PolicyStatus>) -> DomainResult<Vec<Policy>>;
}
