//! Policy service: lifecycle of standing constraints.
//!
//! User and system policies are active on creation. Learned policies come
//! from policy-type distillations and stay proposed until approved.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ActionCategory, Distillation, Policy, PolicyOrigin, PolicyStatus};
use crate::domain::ports::PolicyRepository;

pub struct PolicyService {
    repository: Arc<dyn PolicyRepository>,
}

impl PolicyService {
    pub fn new(repository: Arc<dyn PolicyRepository>) -> Self {
        Self { repository }
    }

    /// Create a user policy, optionally forbidding a category on a target glob.
    pub async fn create(
        &self,
        statement: String,
        forbid: Option<(ActionCategory, String)>,
        priority: i32,
        scope: Option<String>,
    ) -> DomainResult<Policy> {
        if statement.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "policy statement must not be empty".to_string(),
            ));
        }
        let mut policy = Policy::new(statement, PolicyOrigin::User, Utc::now()).with_priority(priority);
        if let Some((category, glob)) = forbid {
            policy = policy.with_forbid(category, glob);
        }
        if let Some(scope) = scope {
            policy = policy.with_scope(scope);
        }
        self.repository.create(&policy).await?;
        tracing::info!(policy_id = %policy.id, statement = %policy.statement, "policy created");
        Ok(policy)
    }

    /// Propose a learned policy from a distillation. Returns `None` when the
    /// distillation already has a proposal.
    pub async fn propose_from_distillation(
        &self,
        distillation: &Distillation,
    ) -> DomainResult<Option<Policy>> {
        let existing = self.repository.list(None).await?;
        if existing
            .iter()
            .any(|p| p.source_distillation == Some(distillation.id))
        {
            return Ok(None);
        }
        let mut policy = Policy::new(distillation.statement.clone(), PolicyOrigin::Learned, Utc::now());
        policy.source_distillation = Some(distillation.id);
        self.repository.create(&policy).await?;
        tracing::info!(
            policy_id = %policy.id,
            distillation_id = %distillation.id,
            "learned policy proposed"
        );
        Ok(Some(policy))
    }

    pub async fn approve(&self, id: Uuid) -> DomainResult<Policy> {
        let mut policy = self.get(id).await?;
        policy.approve(Utc::now())?;
        self.repository.update(&policy).await?;
        tracing::info!(policy_id = %id, "policy approved");
        Ok(policy)
    }

    pub async fn retire(&self, id: Uuid) -> DomainResult<Policy> {
        let mut policy = self.get(id).await?;
        policy.retire(Utc::now())?;
        self.repository.update(&policy).await?;
        tracing::info!(policy_id = %id, "policy retired");
        Ok(policy)
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Policy> {
        self.repository
            .get(id)
            .await?
            .ok_or(DomainError::PolicyNotFound(id))
    }

    pub async fn list(&self, status: Option<PolicyStatus>) -> DomainResult<Vec<Policy>> {
        self.repository.list(status).await
    }

    /// Active policies, highest priority first.
    pub async fn active(&self) -> DomainResult<Vec<Policy>> {
        self.repository.list(Some(PolicyStatus::Active)).await
    }
}
