//! Trigger rules: explicit pattern → advice mappings.
//!
//! `TriggerRule` pairs a case-insensitive regex with advice text and a
//! priority. The `TriggerRuleEngine` keeps compiled rules in memory, reloads
//! them from the repository, and creates linked rules when a distillation is
//! promoted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Distillation, Priority};
use crate::domain::ports::TriggerRuleRepository;

/// A declarative advice rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: Uuid,
    pub name: String,
    /// Case-insensitive regex tested against the query text
    pub pattern: String,
    pub advice: String,
    pub priority: Priority,
    /// Distillation this rule was promoted from
    pub distillation_id: Option<Uuid>,
    pub enabled: bool,
    /// Last time this rule matched.
    pub last_fired: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TriggerRule {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        advice: impl Into<String>,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pattern: pattern.into(),
            advice: advice.into(),
            priority,
            distillation_id: None,
            enabled: true,
            last_fired: None,
            fire_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn compile(&self) -> DomainResult<Regex> {
        RegexBuilder::new(&self.pattern)
            .case_insensitive(true)
            .size_limit(1 << 20)
            .build()
            .map_err(|e| {
                DomainError::ValidationFailed(format!("invalid pattern for rule '{}': {e}", self.name))
            })
    }

    /// Rule derived from a promoted distillation, matching any of its trigger tags.
    pub fn from_distillation(distillation: &Distillation, priority: Priority) -> DomainResult<Self> {
        if distillation.trigger_tags.is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "distillation {} has no trigger tags",
                distillation.id
            )));
        }
        let alternatives = distillation
            .trigger_tags
            .iter()
            .map(|t| regex::escape(t.trim()))
            .collect::<Vec<_>>()
            .join("|");
        let mut rule = Self::new(
            format!("distilled-{}", distillation.id),
            format!("(?:{alternatives})"),
            distillation.statement.clone(),
            priority,
        );
        rule.distillation_id = Some(distillation.id);
        Ok(rule)
    }
}

/// A rule that matched a query.
#[derive(Debug, Clone)]
pub struct TriggerMatch {
    pub rule: TriggerRule,
}

struct CompiledRule {
    rule: TriggerRule,
    regex: Regex,
}

/// In-memory matcher over the enabled rules.
pub struct TriggerRuleEngine {
    repo: Arc<dyn TriggerRuleRepository>,
    rules: RwLock<Vec<CompiledRule>>,
}

impl TriggerRuleEngine {
    pub fn new(repo: Arc<dyn TriggerRuleRepository>) -> Self {
        Self {
            repo,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Reload enabled rules from storage. Rules whose pattern no longer
    /// compiles are skipped with a warning.
    pub async fn reload(&self) -> DomainResult<usize> {
        let stored = self.repo.list_enabled().await?;
        let mut compiled = Vec::with_capacity(stored.len());
        for rule in stored {
            match rule.compile() {
                Ok(regex) => compiled.push(CompiledRule { rule, regex }),
                Err(e) => tracing::warn!(rule = %rule.name, error = %e, "skipping trigger rule"),
            }
        }
        let count = compiled.len();
        *self.rules.write().await = compiled;
        Ok(count)
    }

    /// Validate and store a new rule, then make it live.
    pub async fn add_rule(&self, rule: TriggerRule) -> DomainResult<TriggerRule> {
        let regex = rule.compile()?;
        if self.repo.get_by_name(&rule.name).await?.is_some() {
            return Err(DomainError::ValidationFailed(format!(
                "trigger rule '{}' already exists",
                rule.name
            )));
        }
        self.repo.create(&rule).await?;
        tracing::info!(rule = %rule.name, priority = %rule.priority, "trigger rule added");
        if rule.enabled {
            self.rules.write().await.push(CompiledRule {
                rule: rule.clone(),
                regex,
            });
        }
        Ok(rule)
    }

    /// Create, or return the existing, rule linked to a promoted distillation.
    pub async fn promote(&self, distillation: &Distillation) -> DomainResult<TriggerRule> {
        if let Some(existing) = self.repo.get_by_distillation(distillation.id).await? {
            return Ok(existing);
        }
        let priority = if distillation.kind == crate::domain::models::DistillationType::SharpEdge {
            Priority::High
        } else {
            Priority::Normal
        };
        self.add_rule(TriggerRule::from_distillation(distillation, priority)?)
            .await
    }

    /// Disable the rule linked to a distillation, if any.
    pub async fn disable_for_distillation(&self, distillation_id: Uuid) -> DomainResult<()> {
        if let Some(mut rule) = self.repo.get_by_distillation(distillation_id).await? {
            rule.enabled = false;
            rule.updated_at = Utc::now();
            self.repo.update(&rule).await?;
            self.rules
                .write()
                .await
                .retain(|c| c.rule.id != rule.id);
        }
        Ok(())
    }

    /// Enabled rules whose pattern matches the query.
    pub async fn match_query(&self, query: &str) -> Vec<TriggerMatch> {
        self.rules
            .read()
            .await
            .iter()
            .filter(|c| c.regex.is_match(query))
            .map(|c| TriggerMatch {
                rule: c.rule.clone(),
            })
            .collect()
    }

    /// Bump fire counters for matched rules. Best effort.
    pub async fn record_fired(&self, rule_ids: &[Uuid]) {
        let now = Utc::now();
        for id in rule_ids {
            let updated = match self.repo.get(*id).await {
                Ok(Some(mut rule)) => {
                    rule.fire_count += 1;
                    rule.last_fired = Some(now);
                    self.repo.update(&rule).await
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = updated {
                tracing::debug!(rule_id = %id, error = %e, "failed to record trigger firing");
            }
        }
    }

    pub async fn list_rules(&self) -> DomainResult<Vec<TriggerRule>> {
        self.repo.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteTriggerRuleRepository};
    use crate::domain::models::{DistillationCandidate, DistillationType, OutcomeDirection};

    async fn engine() -> TriggerRuleEngine {
        let pool = create_migrated_test_pool().await.unwrap();
        TriggerRuleEngine::new(Arc::new(SqliteTriggerRuleRepository::new(pool)))
    }

    #[tokio::test]
    async fn test_case_insensitive_match() {
        let engine = engine().await;
        engine
            .add_rule(TriggerRule::new("auth", "auth", "check token expiry", Priority::High))
            .await
            .unwrap();

        assert_eq!(engine.match_query("Editing AUTHENTICATION module").await.len(), 1);
        assert!(engine.match_query("editing billing").await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pattern_rejected() {
        let engine = engine().await;
        let result = engine
            .add_rule(TriggerRule::new("bad", "(unclosed", "x", Priority::Normal))
            .await;
        assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_promotion_is_idempotent_and_reloads() {
        let engine = engine().await;
        let candidate = DistillationCandidate {
            episode_id: Uuid::new_v4(),
            statement: "Run migrations before integration tests".into(),
            kind: DistillationType::SharpEdge,
            direction: OutcomeDirection::Negative,
            domain_tags: vec![],
            trigger_tags: vec!["migration".into(), "db.reset".into()],
            provenance: vec![Uuid::new_v4()],
            impact: 0.0,
            novelty: 0.0,
            generalizability: 0.0,
            surprise: 0.0,
        };
        let distillation = Distillation::from_candidate(&candidate, 0.8, Utc::now());

        let first = engine.promote(&distillation).await.unwrap();
        let second = engine.promote(&distillation).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.priority, Priority::High);

        assert_eq!(engine.reload().await.unwrap(), 1);
        assert_eq!(engine.match_query("add a Migration file").await.len(), 1);
        // Tags are escaped, so the dot is literal.
        assert!(engine.match_query("dbXreset").await.is_empty());

        engine.disable_for_distillation(distillation.id).await.unwrap();
        assert!(engine.match_query("add a migration").await.is_empty());
    }
}
