//! SQLite implementation of the InsightRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{
    parse_datetime, parse_json, parse_optional_datetime, parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Insight, Retention};
use crate::domain::ports::InsightRepository;

#[derive(Clone)]
pub struct SqliteInsightRepository {
    pool: SqlitePool,
}

impl SqliteInsightRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InsightRow {
    id: String,
    episode_id: Option<String>,
    body: String,
    signals: String,
    importance: f64,
    durable: i32,
    expires_at: Option<String>,
    fingerprint: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<InsightRow> for Insight {
    type Error = DomainError;

    fn try_from(row: InsightRow) -> DomainResult<Self> {
        let retention = if row.durable != 0 {
            Retention::Durable
        } else {
            let expires_at = parse_optional_datetime(row.expires_at)?.ok_or_else(|| {
                DomainError::SerializationError(format!("ephemeral insight {} has no expiry", row.id))
            })?;
            Retention::Ephemeral { expires_at }
        };
        Ok(Self {
            id: parse_uuid(&row.id)?,
            episode_id: parse_optional_uuid(row.episode_id)?,
            kind: parse_json(&row.body)?,
            signals: parse_json(&row.signals)?,
            importance: row.importance,
            retention,
            fingerprint: row.fingerprint,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl InsightRepository for SqliteInsightRepository {
    async fn insert(&self, insight: &Insight) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO insights
               (id, episode_id, kind, body, signals, importance, durable, expires_at,
                fingerprint, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(insight.id.to_string())
        .bind(insight.episode_id.map(|id| id.to_string()))
        .bind(insight.kind.as_str())
        .bind(serde_json::to_string(&insight.kind)?)
        .bind(serde_json::to_string(&insight.signals)?)
        .bind(insight.importance)
        .bind(i32::from(insight.retention.is_durable()))
        .bind(insight.retention.expires_at().map(|t| t.to_rfc3339()))
        .bind(&insight.fingerprint)
        .bind(insight.created_at.to_rfc3339())
        .bind(insight.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, insight: &Insight) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE insights SET
               signals = ?, importance = ?, durable = ?, expires_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(serde_json::to_string(&insight.signals)?)
        .bind(insight.importance)
        .bind(i32::from(insight.retention.is_durable()))
        .bind(insight.retention.expires_at().map(|t| t.to_rfc3339()))
        .bind(insight.updated_at.to_rfc3339())
        .bind(insight.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::InsightNotFound(insight.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Insight>> {
        let row: Option<InsightRow> = sqlx::query_as("SELECT * FROM insights WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Insight::try_from).transpose()
    }

    async fn count_fingerprint(&self, fingerprint: &str) -> DomainResult<u32> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM insights WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u32)
    }

    async fn list(&self, durable_only: bool) -> DomainResult<Vec<Insight>> {
        let sql = if durable_only {
            "SELECT * FROM insights WHERE durable = 1 ORDER BY created_at"
        } else {
            "SELECT * FROM insights ORDER BY created_at"
        };
        let rows: Vec<InsightRow> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Insight::try_from).collect()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> DomainResult<Vec<Uuid>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "DELETE FROM insights WHERE durable = 0 AND expires_at <= ? RETURNING id",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        ids.iter().map(|(id,)| parse_uuid(id)).collect()
    }
}
