//! Standing constraints read by guardrails on every step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::ActionCategory;
use crate::domain::errors::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOrigin {
    User,
    System,
    Learned,
}

impl PolicyOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Learned => "learned",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            "learned" => Some(Self::Learned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Proposed,
    Active,
    Retired,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(Self::Proposed),
            "active" => Some(Self::Active),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

/// Action shape a policy forbids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyForbid {
    pub category: ActionCategory,
    /// Glob over the action target; `*` matches every target
    pub target_glob: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub statement: String,
    /// Free-form scope label (e.g. `global`, `repo:api`)
    pub scope: String,
    /// Higher runs first
    pub priority: i32,
    pub origin: PolicyOrigin,
    pub status: PolicyStatus,
    pub forbids: Option<PolicyForbid>,
    pub source_distillation: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    /// User and system policies are approved by their author and start active.
    /// Learned policies always start as proposals.
    pub fn new(statement: impl Into<String>, origin: PolicyOrigin, now: DateTime<Utc>) -> Self {
        let status = match origin {
            PolicyOrigin::User | PolicyOrigin::System => PolicyStatus::Active,
            PolicyOrigin::Learned => PolicyStatus::Proposed,
        };
        Self {
            id: Uuid::new_v4(),
            statement: statement.into(),
            scope: "global".to_string(),
            priority: 0,
            origin,
            status,
            forbids: None,
            source_distillation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_forbid(mut self, category: ActionCategory, target_glob: impl Into<String>) -> Self {
        self.forbids = Some(PolicyForbid {
            category,
            target_glob: target_glob.into(),
        });
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == PolicyStatus::Active
    }

    pub fn approve(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != PolicyStatus::Proposed {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: PolicyStatus::Active.as_str().to_string(),
                reason: "only proposed policies can be approved".to_string(),
            });
        }
        self.status = PolicyStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub fn retire(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == PolicyStatus::Retired {
            return Err(DomainError::InvalidStateTransition {
                from: PolicyStatus::Retired.as_str().to_string(),
                to: PolicyStatus::Retired.as_str().to_string(),
                reason: "policy is already retired".to_string(),
            });
        }
        self.status = PolicyStatus::Retired;
        self.updated_at = now;
        Ok(())
    }
}
