//! SQLite implementation of the EvidenceRepository.
//!
//! Expiry is enforced on read as well as by the sweep, so an expired record
//! is unreadable even before the sweep removes it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_enum, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DiagnosticKind, Evidence, EvidenceKind};
use crate::domain::ports::EvidenceRepository;

#[derive(Clone)]
pub struct SqliteEvidenceRepository {
    pool: SqlitePool,
}

impl SqliteEvidenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EvidenceRow {
    id: String,
    step_id: String,
    episode_id: String,
    kind: String,
    diagnostic: Option<String>,
    target: Option<String>,
    content: String,
    created_at: String,
    expires_at: Option<String>,
}

impl TryFrom<EvidenceRow> for Evidence {
    type Error = DomainError;

    fn try_from(row: EvidenceRow) -> DomainResult<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            step_id: parse_uuid(&row.step_id)?,
            episode_id: parse_uuid(&row.episode_id)?,
            kind: parse_enum(&row.kind, "evidence kind", EvidenceKind::from_str)?,
            diagnostic: row
                .diagnostic
                .as_deref()
                .map(|d| parse_enum(d, "diagnostic kind", DiagnosticKind::from_str))
                .transpose()?,
            target: row.target,
            content: row.content,
            created_at: parse_datetime(&row.created_at)?,
            expires_at: parse_optional_datetime(row.expires_at)?,
        })
    }
}

const LIVE: &str = "(expires_at IS NULL OR expires_at > ?)";

#[async_trait]
impl EvidenceRepository for SqliteEvidenceRepository {
    async fn insert(&self, evidence: &Evidence) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO evidence
               (id, step_id, episode_id, kind, diagnostic, target, content, created_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(evidence.id.to_string())
        .bind(evidence.step_id.to_string())
        .bind(evidence.episode_id.to_string())
        .bind(evidence.kind.as_str())
        .bind(evidence.diagnostic.map(|d| d.as_str()))
        .bind(&evidence.target)
        .bind(&evidence.content)
        .bind(evidence.created_at.to_rfc3339())
        .bind(evidence.expires_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid, now: DateTime<Utc>) -> DomainResult<Option<Evidence>> {
        let row: Option<EvidenceRow> =
            sqlx::query_as(&format!("SELECT * FROM evidence WHERE id = ? AND {LIVE}"))
                .bind(id.to_string())
                .bind(now.to_rfc3339())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Evidence::try_from).transpose()
    }

    async fn list_by_step(&self, step_id: Uuid, now: DateTime<Utc>) -> DomainResult<Vec<Evidence>> {
        let rows: Vec<EvidenceRow> = sqlx::query_as(&format!(
            "SELECT * FROM evidence WHERE step_id = ? AND {LIVE} ORDER BY created_at"
        ))
        .bind(step_id.to_string())
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Evidence::try_from).collect()
    }

    async fn list_by_episode(
        &self,
        episode_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<Evidence>> {
        let rows: Vec<EvidenceRow> = sqlx::query_as(&format!(
            "SELECT * FROM evidence WHERE episode_id = ? AND {LIVE} ORDER BY created_at"
        ))
        .bind(episode_id.to_string())
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Evidence::try_from).collect()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let result =
            sqlx::query("DELETE FROM evidence WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now.to_rfc3339())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
