//! SQLite-backed event queue with lease-based, at-least-once delivery.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::adapters::sqlite::{parse_datetime, parse_enum, parse_json, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{QueueStatus, QueuedEvent, RawEvent};
use crate::domain::ports::EventQueue;

#[derive(Clone)]
pub struct SqliteEventQueue {
    pool: SqlitePool,
}

impl SqliteEventQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    seq: i64,
    payload: String,
    status: String,
    attempts: i64,
    lease_until: Option<String>,
    last_error: Option<String>,
    enqueued_at: String,
}

impl TryFrom<QueueRow> for QueuedEvent {
    type Error = DomainError;

    fn try_from(row: QueueRow) -> DomainResult<Self> {
        Ok(Self {
            seq: row.seq,
            event: parse_json(&row.payload)?,
            status: parse_enum(&row.status, "queue status", QueueStatus::from_str)?,
            attempts: row.attempts as u32,
            lease_until: parse_optional_datetime(row.lease_until)?,
            last_error: row.last_error,
            enqueued_at: parse_datetime(&row.enqueued_at)?,
        })
    }
}

#[async_trait]
impl EventQueue for SqliteEventQueue {
    async fn enqueue(&self, event: &RawEvent) -> DomainResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO event_queue (event_id, session_id, payload, status, enqueued_at)
               VALUES (?, ?, ?, 'pending', ?)"#,
        )
        .bind(&event.event_id)
        .bind(&event.session_id)
        .bind(serde_json::to_string(event)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn claim(&self, limit: usize, lease: Duration) -> DomainResult<Vec<QueuedEvent>> {
        let lease_until = (Utc::now() + lease).to_rfc3339();
        // Single statement, so concurrent claimers never lease the same row.
        let mut rows: Vec<QueueRow> = sqlx::query_as(
            r#"UPDATE event_queue SET status = 'leased', lease_until = ?
               WHERE seq IN (
                   SELECT seq FROM event_queue WHERE status = 'pending' ORDER BY seq LIMIT ?
               )
               RETURNING seq, payload, status, attempts, lease_until, last_error, enqueued_at"#,
        )
        .bind(&lease_until)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.sort_by_key(|r| r.seq);
        rows.into_iter().map(QueuedEvent::try_from).collect()
    }

    async fn ack(&self, seq: i64) -> DomainResult<()> {
        sqlx::query("UPDATE event_queue SET status = 'done', lease_until = NULL WHERE seq = ?")
            .bind(seq)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, seq: i64, error: &str, max_attempts: u32) -> DomainResult<QueueStatus> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"UPDATE event_queue SET
                 attempts = attempts + 1,
                 last_error = ?,
                 lease_until = NULL,
                 status = CASE WHEN attempts + 1 >= ? THEN 'dead' ELSE 'pending' END
               WHERE seq = ?
               RETURNING status"#,
        )
        .bind(error)
        .bind(i64::from(max_attempts))
        .bind(seq)
        .fetch_optional(&self.pool)
        .await?;

        let (status,) = row.ok_or_else(|| {
            DomainError::ValidationFailed(format!("queued event {seq} does not exist"))
        })?;
        parse_enum(&status, "queue status", QueueStatus::from_str)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            "UPDATE event_queue SET status = 'pending', lease_until = NULL
             WHERE status = 'leased' AND lease_until <= ?",
        )
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> DomainResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM event_queue WHERE status IN ('pending', 'leased')")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::RawEventKind;

    async fn setup() -> SqliteEventQueue {
        SqliteEventQueue::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_claim_preserves_append_order_and_leases() {
        let queue = setup().await;
        for i in 0..3 {
            let mut event = RawEvent::new("s", RawEventKind::Note);
            event.event_id = format!("e{i}");
            queue.enqueue(&event).await.unwrap();
        }

        let claimed = queue.claim(2, Duration::seconds(30)).await.unwrap();
        assert_eq!(
            claimed.iter().map(|c| c.event.event_id.as_str()).collect::<Vec<_>>(),
            vec!["e0", "e1"]
        );
        assert!(claimed.iter().all(|c| c.status == QueueStatus::Leased));

        // Leased rows are not handed out twice.
        let next = queue.claim(10, Duration::seconds(30)).await.unwrap();
        assert_eq!(next.len(), 1);

        queue.ack(claimed[0].seq).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_leases_are_redelivered() {
        let queue = setup().await;
        queue.enqueue(&RawEvent::new("s", RawEventKind::Note)).await.unwrap();
        let first = queue.claim(1, Duration::seconds(-1)).await.unwrap();
        assert_eq!(first.len(), 1);

        let released = queue.release_expired_leases(Utc::now()).await.unwrap();
        assert_eq!(released, 1);
        let again = queue.claim(1, Duration::seconds(30)).await.unwrap();
        assert_eq!(again[0].seq, first[0].seq);
    }

    #[tokio::test]
    async fn test_nack_goes_dead_after_max_attempts() {
        let queue = setup().await;
        let seq = queue.enqueue(&RawEvent::new("s", RawEventKind::Note)).await.unwrap();
        queue.claim(1, Duration::seconds(30)).await.unwrap();
        assert_eq!(queue.nack(seq, "boom", 2).await.unwrap(), QueueStatus::Pending);
        queue.claim(1, Duration::seconds(30)).await.unwrap();
        assert_eq!(queue.nack(seq, "boom", 2).await.unwrap(), QueueStatus::Dead);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }
}
