//! SQLite implementation of the DistillationRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{
    parse_datetime, parse_enum, parse_json_or_default, parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Distillation, DistillationStatus, DistillationType, OutcomeDirection};
use crate::domain::ports::DistillationRepository;

#[derive(Clone)]
pub struct SqliteDistillationRepository {
    pool: SqlitePool,
}

impl SqliteDistillationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DistillationRow {
    id: String,
    statement: String,
    kind: String,
    direction: String,
    domain_tags: Option<String>,
    trigger_tags: Option<String>,
    provenance: Option<String>,
    source_episodes: Option<String>,
    validation_count: i64,
    contradiction_count: i64,
    confidence: f64,
    status: String,
    fingerprint: String,
    promoted_rule_id: Option<String>,
    created_at: String,
    updated_at: String,
    last_reinforced_at: String,
}

impl TryFrom<DistillationRow> for Distillation {
    type Error = DomainError;

    fn try_from(row: DistillationRow) -> DomainResult<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            statement: row.statement,
            kind: parse_enum(&row.kind, "distillation type", DistillationType::from_str)?,
            direction: parse_enum(&row.direction, "direction", OutcomeDirection::from_str)?,
            domain_tags: parse_json_or_default(row.domain_tags)?,
            trigger_tags: parse_json_or_default(row.trigger_tags)?,
            provenance: parse_json_or_default(row.provenance)?,
            source_episodes: parse_json_or_default(row.source_episodes)?,
            validation_count: row.validation_count as u32,
            contradiction_count: row.contradiction_count as u32,
            confidence: row.confidence,
            status: parse_enum(&row.status, "distillation status", DistillationStatus::from_str)?,
            fingerprint: row.fingerprint,
            promoted_rule_id: parse_optional_uuid(row.promoted_rule_id)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            last_reinforced_at: parse_datetime(&row.last_reinforced_at)?,
        })
    }
}

#[async_trait]
impl DistillationRepository for SqliteDistillationRepository {
    async fn insert(&self, d: &Distillation) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO distillations
               (id, statement, kind, direction, domain_tags, trigger_tags, provenance,
                source_episodes, validation_count, contradiction_count, confidence, status,
                fingerprint, promoted_rule_id, created_at, updated_at, last_reinforced_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(d.id.to_string())
        .bind(&d.statement)
        .bind(d.kind.as_str())
        .bind(d.direction.as_str())
        .bind(serde_json::to_string(&d.domain_tags)?)
        .bind(serde_json::to_string(&d.trigger_tags)?)
        .bind(serde_json::to_string(&d.provenance)?)
        .bind(serde_json::to_string(&d.source_episodes)?)
        .bind(i64::from(d.validation_count))
        .bind(i64::from(d.contradiction_count))
        .bind(d.confidence)
        .bind(d.status.as_str())
        .bind(&d.fingerprint)
        .bind(d.promoted_rule_id.map(|id| id.to_string()))
        .bind(d.created_at.to_rfc3339())
        .bind(d.updated_at.to_rfc3339())
        .bind(d.last_reinforced_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, d: &Distillation) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE distillations SET
               statement = ?, domain_tags = ?, trigger_tags = ?, provenance = ?,
               source_episodes = ?, validation_count = ?, contradiction_count = ?,
               confidence = ?, status = ?, promoted_rule_id = ?,
               updated_at = ?, last_reinforced_at = ?
               WHERE id = ?"#,
        )
        .bind(&d.statement)
        .bind(serde_json::to_string(&d.domain_tags)?)
        .bind(serde_json::to_string(&d.trigger_tags)?)
        .bind(serde_json::to_string(&d.provenance)?)
        .bind(serde_json::to_string(&d.source_episodes)?)
        .bind(i64::from(d.validation_count))
        .bind(i64::from(d.contradiction_count))
        .bind(d.confidence)
        .bind(d.status.as_str())
        .bind(d.promoted_rule_id.map(|id| id.to_string()))
        .bind(d.updated_at.to_rfc3339())
        .bind(d.last_reinforced_at.to_rfc3339())
        .bind(d.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::DistillationNotFound(d.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Distillation>> {
        let row: Option<DistillationRow> =
            sqlx::query_as("SELECT * FROM distillations WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Distillation::try_from).transpose()
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> DomainResult<Option<Distillation>> {
        let row: Option<DistillationRow> =
            sqlx::query_as("SELECT * FROM distillations WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Distillation::try_from).transpose()
    }

    async fn list(
        &self,
        min_confidence: f64,
        include_superseded: bool,
    ) -> DomainResult<Vec<Distillation>> {
        let sql = if include_superseded {
            "SELECT * FROM distillations WHERE confidence >= ? ORDER BY confidence DESC"
        } else {
            "SELECT * FROM distillations WHERE confidence >= ? AND status = 'active'
             ORDER BY confidence DESC"
        };
        let rows: Vec<DistillationRow> = sqlx::query_as(sql)
            .bind(min_confidence)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Distillation::try_from).collect()
    }

    async fn record_run(&self, episode_id: Uuid, candidates: u32) -> DomainResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO distillation_runs (episode_id, candidates, completed_at)
             VALUES (?, ?, ?)",
        )
        .bind(episode_id.to_string())
        .bind(i64::from(candidates))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn has_run(&self, episode_id: Uuid) -> DomainResult<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT episode_id FROM distillation_runs WHERE episode_id = ?")
                .bind(episode_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}
