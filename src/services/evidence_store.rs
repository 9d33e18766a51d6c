//! Evidence store.
//!
//! Appends scrubbed proof artifacts keyed by step, each with an expiry from
//! the per-kind retention table. Reads never return expired records; the
//! sweep deletes them. Episodes and distillations only ever hold evidence
//! ids, so expiry removes replay detail without invalidating history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Evidence, EvidenceInput, EvidenceRef, RetentionHours};
use crate::domain::ports::EvidenceRepository;
use crate::infrastructure::logging::SecretScrubber;
use crate::services::keyed_lock::KeyedLocks;

/// Result of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: u64,
}

pub struct EvidenceStore {
    repo: Arc<dyn EvidenceRepository>,
    scrubber: SecretScrubber,
    step_locks: KeyedLocks<Uuid>,
}

impl EvidenceStore {
    pub fn new(repo: Arc<dyn EvidenceRepository>) -> Self {
        Self {
            repo,
            scrubber: SecretScrubber::new(),
            step_locks: KeyedLocks::new(),
        }
    }

    /// Append evidence for one step. Content is scrubbed before it is written.
    pub async fn record(
        &self,
        episode_id: Uuid,
        step_id: Uuid,
        step_sequence: u32,
        inputs: Vec<EvidenceInput>,
        retention: &RetentionHours,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<EvidenceRef>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.step_locks.lock(&step_id).await;

        let mut refs = Vec::with_capacity(inputs.len());
        for mut input in inputs {
            let scrubbed = self.scrubber.scrub(&input.content);
            if scrubbed != input.content {
                tracing::info!(%step_id, kind = input.kind.as_str(), "redacted secrets from evidence");
            }
            input.content = scrubbed;

            let evidence = Evidence::new(episode_id, step_id, input, retention, now);
            self.repo.insert(&evidence).await?;
            tracing::debug!(
                evidence_id = %evidence.id,
                %step_id,
                kind = evidence.kind.as_str(),
                expires_at = ?evidence.expires_at,
                "evidence recorded"
            );
            refs.push(EvidenceRef {
                evidence_id: evidence.id,
                step_id,
                step_sequence,
                kind: evidence.kind,
                diagnostic: evidence.diagnostic,
                target: evidence.target,
            });
        }
        Ok(refs)
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Option<Evidence>> {
        self.repo.get(id, Utc::now()).await
    }

    pub async fn for_step(&self, step_id: Uuid) -> DomainResult<Vec<Evidence>> {
        self.repo.list_by_step(step_id, Utc::now()).await
    }

    pub async fn for_episode(&self, episode_id: Uuid) -> DomainResult<Vec<Evidence>> {
        self.repo.list_by_episode(episode_id, Utc::now()).await
    }

    /// Delete everything past its expiry.
    pub async fn sweep(&self, now: DateTime<Utc>) -> DomainResult<SweepReport> {
        let deleted = self.repo.delete_expired(now).await?;
        if deleted > 0 {
            tracing::info!(deleted, "expired evidence swept");
        }
        Ok(SweepReport { deleted })
    }
}
