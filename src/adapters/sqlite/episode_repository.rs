//! SQLite implementation of the EpisodeRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{
    parse_datetime, parse_enum, parse_json, parse_json_or_default, parse_optional_datetime,
    parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::DomainResult;
use crate::domain::models::{Episode, EpisodeStatus, Phase, Step};
use crate::domain::ports::EpisodeRepository;

#[derive(Clone)]
pub struct SqliteEpisodeRepository {
    pool: SqlitePool,
}

impl SqliteEpisodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EpisodeRow {
    id: String,
    session_id: String,
    goal: String,
    success_criterion: String,
    constraints: Option<String>,
    budget: String,
    phase: String,
    phase_history: Option<String>,
    status: String,
    steps_taken: i64,
    active_step: Option<String>,
    frozen_targets: Option<String>,
    evidence_refs: Option<String>,
    unpersisted: i32,
    completion: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<EpisodeRow> for Episode {
    type Error = crate::domain::errors::DomainError;

    fn try_from(row: EpisodeRow) -> DomainResult<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            session_id: row.session_id,
            goal: row.goal,
            success_criterion: row.success_criterion,
            constraints: parse_json_or_default(row.constraints)?,
            budget: parse_json(&row.budget)?,
            phase: parse_enum(&row.phase, "phase", Phase::from_str)?,
            phase_history: parse_json_or_default(row.phase_history)?,
            status: parse_enum(&row.status, "episode status", EpisodeStatus::from_str)?,
            steps_taken: row.steps_taken as u32,
            active_step: parse_optional_uuid(row.active_step)?,
            frozen_targets: parse_json_or_default(row.frozen_targets)?,
            evidence_refs: parse_json_or_default(row.evidence_refs)?,
            unpersisted: row.unpersisted != 0,
            completion: row.completion.as_deref().map(parse_json).transpose()?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StepRow {
    id: String,
    episode_id: String,
    sequence: i64,
    phase: String,
    packet: String,
    outcome: Option<String>,
    source_event_id: Option<String>,
    started_at: String,
    deadline: String,
    completed_at: Option<String>,
}

impl TryFrom<StepRow> for Step {
    type Error = crate::domain::errors::DomainError;

    fn try_from(row: StepRow) -> DomainResult<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            episode_id: parse_uuid(&row.episode_id)?,
            sequence: row.sequence as u32,
            phase: parse_enum(&row.phase, "phase", Phase::from_str)?,
            packet: parse_json(&row.packet)?,
            outcome: row.outcome.as_deref().map(parse_json).transpose()?,
            source_event_id: row.source_event_id,
            started_at: parse_datetime(&row.started_at)?,
            deadline: parse_datetime(&row.deadline)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[async_trait]
impl EpisodeRepository for SqliteEpisodeRepository {
    async fn upsert_episode(&self, episode: &Episode) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO episodes
               (id, session_id, goal, success_criterion, constraints, budget, phase,
                phase_history, status, steps_taken, active_step, frozen_targets,
                evidence_refs, unpersisted, completion, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 constraints = excluded.constraints,
                 budget = excluded.budget,
                 phase = excluded.phase,
                 phase_history = excluded.phase_history,
                 status = excluded.status,
                 steps_taken = excluded.steps_taken,
                 active_step = excluded.active_step,
                 frozen_targets = excluded.frozen_targets,
                 evidence_refs = excluded.evidence_refs,
                 unpersisted = excluded.unpersisted,
                 completion = COALESCE(episodes.completion, excluded.completion),
                 updated_at = excluded.updated_at"#,
        )
        .bind(episode.id.to_string())
        .bind(&episode.session_id)
        .bind(&episode.goal)
        .bind(&episode.success_criterion)
        .bind(serde_json::to_string(&episode.constraints)?)
        .bind(serde_json::to_string(&episode.budget)?)
        .bind(episode.phase.as_str())
        .bind(serde_json::to_string(&episode.phase_history)?)
        .bind(episode.status.as_str())
        .bind(i64::from(episode.steps_taken))
        .bind(episode.active_step.map(|id| id.to_string()))
        .bind(serde_json::to_string(&episode.frozen_targets)?)
        .bind(serde_json::to_string(&episode.evidence_refs)?)
        .bind(i32::from(episode.unpersisted))
        .bind(episode.completion.as_ref().map(serde_json::to_string).transpose()?)
        .bind(episode.created_at.to_rfc3339())
        .bind(episode.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_episode(&self, id: Uuid) -> DomainResult<Option<Episode>> {
        let row: Option<EpisodeRow> = sqlx::query_as("SELECT * FROM episodes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Episode::try_from).transpose()
    }

    async fn find_open_by_session(&self, session_id: &str) -> DomainResult<Option<Episode>> {
        let row: Option<EpisodeRow> = sqlx::query_as(
            "SELECT * FROM episodes WHERE session_id = ? AND status = 'open'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Episode::try_from).transpose()
    }

    async fn list_episodes(&self, open_only: bool) -> DomainResult<Vec<Episode>> {
        let sql = if open_only {
            "SELECT * FROM episodes WHERE status = 'open' ORDER BY created_at"
        } else {
            "SELECT * FROM episodes ORDER BY created_at"
        };
        let rows: Vec<EpisodeRow> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Episode::try_from).collect()
    }

    async fn upsert_step(&self, step: &Step) -> DomainResult<()> {
        // Completed rows are never rewritten.
        sqlx::query(
            r#"INSERT INTO steps
               (id, episode_id, sequence, phase, packet, outcome, source_event_id,
                started_at, deadline, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 outcome = excluded.outcome,
                 completed_at = excluded.completed_at
               WHERE steps.completed_at IS NULL"#,
        )
        .bind(step.id.to_string())
        .bind(step.episode_id.to_string())
        .bind(i64::from(step.sequence))
        .bind(step.phase.as_str())
        .bind(serde_json::to_string(&step.packet)?)
        .bind(step.outcome.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&step.source_event_id)
        .bind(step.started_at.to_rfc3339())
        .bind(step.deadline.to_rfc3339())
        .bind(step.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_step(&self, id: Uuid) -> DomainResult<Option<Step>> {
        let row: Option<StepRow> = sqlx::query_as("SELECT * FROM steps WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Step::try_from).transpose()
    }

    async fn list_steps(&self, episode_id: Uuid) -> DomainResult<Vec<Step>> {
        let rows: Vec<StepRow> =
            sqlx::query_as("SELECT * FROM steps WHERE episode_id = ? ORDER BY sequence")
                .bind(episode_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn find_step_by_source_event(&self, event_id: &str) -> DomainResult<Option<Step>> {
        let row: Option<StepRow> = sqlx::query_as("SELECT * FROM steps WHERE source_event_id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Step::try_from).transpose()
    }
}
