//! Storage port for trigger rules.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::services::trigger_rules::TriggerRule;

#[async_trait]
pub trait TriggerRuleRepository: Send + Sync {
    async fn create(&self, rule: &TriggerRule) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<TriggerRule>>;

    /// Names are unique; used to reject duplicate manual rules.
    async fn get_by_name(&self, name: &str) -> DomainResult<Option<TriggerRule>>;

    /// The rule a distillation was promoted into, if any.
    async fn get_by_distillation(&self, distillation_id: Uuid) -> DomainResult<Option<TriggerRule>>;

    /// Persist enabled flag, fire count and last-fired time.
    async fn update(&self, rule: &TriggerRule) -> DomainResult<()>;

    /// Every rule, ordered by name.
    async fn list(&self) -> DomainResult<Vec<TriggerRule>>;

    /// Rules loaded into the matcher at startup.
    async fn list_enabled(&self) -> DomainResult<Vec<TriggerRule>>;
}
