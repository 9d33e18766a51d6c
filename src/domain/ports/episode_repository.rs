use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Episode, Step};

/// Canonical storage for episodes and their steps.
///
/// Completed steps are write-once: `upsert_step` leaves a row untouched once
/// its `completed_at` is set.
#[async_trait]
pub trait EpisodeRepository: Send + Sync {
    /// Insert or replace an episode snapshot.
    async fn upsert_episode(&self, episode: &Episode) -> DomainResult<()>;

    async fn get_episode(&self, id: Uuid) -> DomainResult<Option<Episode>>;

    /// The open episode for a host session, if any.
    async fn find_open_by_session(&self, session_id: &str) -> DomainResult<Option<Episode>>;

    async fn list_episodes(&self, open_only: bool) -> DomainResult<Vec<Episode>>;

    /// Insert a step, or fill in its outcome if it is still in flight.
    async fn upsert_step(&self, step: &Step) -> DomainResult<()>;

    async fn get_step(&self, id: Uuid) -> DomainResult<Option<Step>>;

    /// Steps of an episode in sequence order.
    async fn list_steps(&self, episode_id: Uuid) -> DomainResult<Vec<Step>>;

    /// Step opened by a given raw event.
    async fn find_step_by_source_event(&self, event_id: &str) -> DomainResult<Option<Step>>;
}
