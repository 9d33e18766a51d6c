//! SQLite implementation of the TriggerRuleRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{
    parse_datetime, parse_enum, parse_optional_datetime, parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::DomainResult;
use crate::domain::models::Priority;
use crate::domain::ports::TriggerRuleRepository;
use crate::services::trigger_rules::TriggerRule;

#[derive(Clone)]
pub struct SqliteTriggerRuleRepository {
    pool: SqlitePool,
}

impl SqliteTriggerRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TriggerRuleRow {
    id: String,
    name: String,
    pattern: String,
    advice: String,
    priority: String,
    distillation_id: Option<String>,
    enabled: i32,
    fire_count: i64,
    last_fired: Option<String>,
    created_at: String,
    updated_at: String,
}

fn row_to_rule(row: TriggerRuleRow) -> DomainResult<TriggerRule> {
    Ok(TriggerRule {
        id: parse_uuid(&row.id)?,
        name: row.name,
        pattern: row.pattern,
        advice: row.advice,
        priority: parse_enum(&row.priority, "priority", Priority::from_str)?,
        distillation_id: parse_optional_uuid(row.distillation_id)?,
        enabled: row.enabled != 0,
        last_fired: parse_optional_datetime(row.last_fired)?,
        fire_count: row.fire_count as u64,
        created_at: parse_datetime(&row.created_at)?,
        updated_at: parse_datetime(&row.updated_at)?,
    })
}

#[async_trait]
impl TriggerRuleRepository for SqliteTriggerRuleRepository {
    async fn create(&self, rule: &TriggerRule) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO trigger_rules
               (id, name, pattern, advice, priority, distillation_id, enabled,
                fire_count, last_fired, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(rule.id.to_string())
        .bind(&rule.name)
        .bind(&rule.pattern)
        .bind(&rule.advice)
        .bind(rule.priority.as_str())
        .bind(rule.distillation_id.map(|id| id.to_string()))
        .bind(i32::from(rule.enabled))
        .bind(rule.fire_count as i64)
        .bind(rule.last_fired.map(|t| t.to_rfc3339()))
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<TriggerRule>> {
        let row: Option<TriggerRuleRow> =
            sqlx::query_as("SELECT * FROM trigger_rules WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(row_to_rule).transpose()
    }

    async fn get_by_name(&self, name: &str) -> DomainResult<Option<TriggerRule>> {
        let row: Option<TriggerRuleRow> =
            sqlx::query_as("SELECT * FROM trigger_rules WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(row_to_rule).transpose()
    }

    async fn get_by_distillation(&self, distillation_id: Uuid) -> DomainResult<Option<TriggerRule>> {
        let row: Option<TriggerRuleRow> =
            sqlx::query_as("SELECT * FROM trigger_rules WHERE distillation_id = ? LIMIT 1")
                .bind(distillation_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(row_to_rule).transpose()
    }

    async fn update(&self, rule: &TriggerRule) -> DomainResult<()> {
        sqlx::query(
            r#"UPDATE trigger_rules SET
               name = ?, pattern = ?, advice = ?, priority = ?,
               enabled = ?, last_fired = ?, fire_count = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&rule.name)
        .bind(&rule.pattern)
        .bind(&rule.advice)
        .bind(rule.priority.as_str())
        .bind(i32::from(rule.enabled))
        .bind(rule.last_fired.map(|t| t.to_rfc3339()))
        .bind(rule.fire_count as i64)
        .bind(rule.updated_at.to_rfc3339())
        .bind(rule.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<TriggerRule>> {
        let rows: Vec<TriggerRuleRow> =
            sqlx::query_as("SELECT * FROM trigger_rules ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(row_to_rule).collect()
    }

    async fn list_enabled(&self) -> DomainResult<Vec<TriggerRule>> {
        let rows: Vec<TriggerRuleRow> =
            sqlx::query_as("SELECT * FROM trigger_rules WHERE enabled = 1 ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(row_to_rule).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn test_disabled_rule_leaves_enabled_list() {
        let repo = SqliteTriggerRuleRepository::new(create_migrated_test_pool().await.unwrap());
        let mut rule = TriggerRule::new("deploys", "deploy", "check the runbook", Priority::Critical);
        repo.create(&rule).await.unwrap();

        rule.enabled = false;
        repo.update(&rule).await.unwrap();
        assert!(repo.list_enabled().await.unwrap().is_empty());
        assert_eq!(repo.get_by_name("deploys").await.unwrap().unwrap().priority, Priority::Critical);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
