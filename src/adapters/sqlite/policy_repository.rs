//! SQLite implementation of the PolicyRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_enum, parse_json, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Policy, PolicyOrigin, PolicyStatus};
use crate::domain::ports::PolicyRepository;

#[derive(Clone)]
pub struct SqlitePolicyRepository {
    pool: SqlitePool,
}

impl SqlitePolicyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PolicyRow {
    id: String,
    statement: String,
    scope: String,
    priority: i64,
    origin: String,
    status: String,
    forbids: Option<String>,
    source_distillation: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PolicyRow> for Policy {
    type Error = DomainError;

    fn try_from(row: PolicyRow) -> DomainResult<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            statement: row.statement,
            scope: row.scope,
            priority: row.priority as i32,
            origin: parse_enum(&row.origin, "policy origin", PolicyOrigin::from_str)?,
            status: parse_enum(&row.status, "policy status", PolicyStatus::from_str)?,
            forbids: row.forbids.as_deref().map(parse_json).transpose()?,
            source_distillation: parse_optional_uuid(row.source_distillation)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl PolicyRepository for SqlitePolicyRepository {
    async fn create(&self, policy: &Policy) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO policies
               (id, statement, scope, priority, origin, status, forbids,
                source_distillation, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(policy.id.to_string())
        .bind(&policy.statement)
        .bind(&policy.scope)
        .bind(i64::from(policy.priority))
        .bind(policy.origin.as_str())
        .bind(policy.status.as_str())
        .bind(policy.forbids.as_ref().map(serde_json::to_string).transpose()?)
        .bind(policy.source_distillation.map(|id| id.to_string()))
        .bind(policy.created_at.to_rfc3339())
        .bind(policy.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, policy: &Policy) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE policies SET
               statement = ?, scope = ?, priority = ?, status = ?, forbids = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&policy.statement)
        .bind(&policy.scope)
        .bind(i64::from(policy.priority))
        .bind(policy.status.as_str())
        .bind(policy.forbids.as_ref().map(serde_json::to_string).transpose()?)
        .bind(policy.updated_at.to_rfc3339())
        .bind(policy.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::PolicyNotFound(policy.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Policy>> {
        let row: Option<PolicyRow> = sqlx::query_as("SELECT * FROM policies WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Policy::try_from).transpose()
    }

    async fn list(&self, status: Option<PolicyStatus>) -> DomainResult<Vec<Policy>> {
        let rows: Vec<PolicyRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM policies WHERE status = ? ORDER BY priority DESC, created_at",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM policies ORDER BY priority DESC, created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Policy::try_from).collect()
    }
}
