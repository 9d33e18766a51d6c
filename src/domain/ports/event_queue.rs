use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{QueueStatus, QueuedEvent, RawEvent};

/// Durable, append-only, at-least-once queue of raw events.
///
/// Claimed events are leased; an event whose lease lapses without an `ack`
/// becomes claimable again.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Append an event, returning its sequence number.
    async fn enqueue(&self, event: &RawEvent) -> DomainResult<i64>;

    /// Lease up to `limit` pending events in append order.
    async fn claim(&self, limit: usize, lease: Duration) -> DomainResult<Vec<QueuedEvent>>;

    async fn ack(&self, seq: i64) -> DomainResult<()>;

    /// Return an event to the queue after a failure. After `max_attempts`
    /// the event is marked dead. Returns the resulting status.
    async fn nack(&self, seq: i64, error: &str, max_attempts: u32) -> DomainResult<QueueStatus>;

    /// Return lapsed leases to pending. Returns the number released.
    async fn release_expired_leases(&self, now: DateTime<Utc>) -> DomainResult<u64>;

    async fn pending_count(&self) -> DomainResult<u64>;
}
