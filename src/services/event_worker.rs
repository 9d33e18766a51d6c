//! Event queue consumer.
//!
//! Claims batches of raw host events, groups them by session and applies each
//! group in append order while independent sessions run concurrently. Events
//! are acknowledged only after the governor has applied them; a redelivered
//! event is recognized by its producer id and does not create a second step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult, GovernanceError, GovernanceResult};
use crate::domain::models::{
    ActionDescriptor, DecisionPacket, NotePayload, Observation, OutcomeClass, Phase, Prediction,
    QueueStatus, QueuedEvent, RawEvent, RawEventKind, RawOutcome, StartPayload, TerminalOutcome,
};
use crate::domain::ports::EventQueue;
use crate::services::governor::Governor;
use crate::services::keyed_lock::KeyedLocks;

const DEFAULT_CONFIDENCE: f64 = 0.5;
const DEFAULT_PREDICTION: &str = "completes without error";

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Disposition {
    Applied,
    /// Refused by the governor; acknowledged, not retried
    Rejected(String),
    /// Nothing to apply (duplicate completion, no open episode)
    Skipped,
}

/// Counts for one claimed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub applied: usize,
    pub rejected: usize,
    pub skipped: usize,
    /// Returned to the queue after a transient failure
    pub retried: usize,
    pub dead: usize,
}

impl BatchReport {
    fn merge(&mut self, other: Self) {
        self.claimed += other.claimed;
        self.applied += other.applied;
        self.rejected += other.rejected;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.dead += other.dead;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub batches: u64,
    pub totals: BatchReport,
    /// Open episodes aborted at shutdown
    pub aborted: usize,
}

/// Handle to stop a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<WorkerStatus>>,
}

impl WorkerHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> WorkerStatus {
        self.status.read().await.clone()
    }
}

pub struct EventWorker {
    queue: Arc<dyn EventQueue>,
    governor: Arc<Governor>,
    sessions: KeyedLocks<String>,
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<WorkerStatus>>,
}

impl EventWorker {
    pub fn new(queue: Arc<dyn EventQueue>, governor: Arc<Governor>) -> Self {
        Self {
            queue,
            governor,
            sessions: KeyedLocks::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(WorkerStatus::default())),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            stop_flag: Arc::clone(&self.stop_flag),
            status: Arc::clone(&self.status),
        }
    }

    /// Append an event to the queue.
    pub async fn enqueue(&self, event: &RawEvent) -> DomainResult<i64> {
        if event.session_id.trim().is_empty() {
            return Err(DomainError::ValidationFailed("event has no session id".into()));
        }
        self.queue.enqueue(event).await
    }

    /// Poll until stopped. On shutdown every open episode is aborted so no
    /// step is left in flight.
    pub async fn run(&self) -> WorkerStatus {
        self.status.write().await.running = true;
        tracing::info!("event worker started");

        while !self.stop_flag.load(Ordering::Acquire) {
            let poll = Duration::from_millis(self.governor.config_snapshot().worker.poll_interval_ms);
            match self.run_once().await {
                Ok(report) if report.claimed > 0 => continue,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "claiming events failed"),
            }
            if self.governor.pending_count() > 0 {
                let recovered = self.governor.flush_pending().await;
                if recovered > 0 {
                    tracing::info!(recovered, "flushed unpersisted episodes");
                }
            }
            tokio::time::sleep(poll).await;
        }

        let aborted = self.governor.abort_all("event worker shutting down").await;
        let mut status = self.status.write().await;
        status.running = false;
        status.aborted = aborted;
        tracing::info!(aborted, batches = status.batches, "event worker stopped");
        status.clone()
    }

    /// Process batches until the queue has nothing claimable.
    pub async fn drain(&self) -> DomainResult<BatchReport> {
        let mut total = BatchReport::default();
        loop {
            let report = self.run_once().await?;
            let done = report.claimed == 0 || report.applied + report.rejected + report.skipped == 0;
            total.merge(report);
            if done {
                return Ok(total);
            }
        }
    }

    /// Claim and apply one batch.
    pub async fn run_once(&self) -> DomainResult<BatchReport> {
        let config = self.governor.config_snapshot().worker.clone();
        let lease = chrono::Duration::seconds(i64::try_from(config.lease_secs).unwrap_or(i64::MAX));
        let claimed = self.queue.claim(config.batch_size.max(1), lease).await?;
        if claimed.is_empty() {
            return Ok(BatchReport::default());
        }

        let groups = group_by_session(claimed);
        let reports = join_all(
            groups
                .into_iter()
                .map(|(session, events)| self.process_session(session, events, config.max_attempts)),
        )
        .await;

        let mut batch = BatchReport::default();
        for report in reports {
            batch.merge(report);
        }
        {
            let mut status = self.status.write().await;
            status.batches += 1;
            status.totals.merge(batch);
        }
        tracing::debug!(
            claimed = batch.claimed,
            applied = batch.applied,
            rejected = batch.rejected,
            retried = batch.retried,
            "event batch processed"
        );
        Ok(batch)
    }

    async fn process_session(
        &self,
        session: String,
        events: Vec<QueuedEvent>,
        max_attempts: u32,
    ) -> BatchReport {
        let _guard = self.sessions.lock(&session).await;
        let mut report = BatchReport {
            claimed: events.len(),
            ..BatchReport::default()
        };

        let mut failed: Option<String> = None;
        for queued in events {
            // Later events of a session wait for the failed one to be retried.
            if let Some(reason) = &failed {
                let deferred = format!("deferred: earlier event failed: {reason}");
                self.nack(queued.seq, &deferred, max_attempts, &mut report).await;
                continue;
            }
            match self.apply(&queued.event).await {
                Ok(disposition) => {
                    match disposition {
                        Disposition::Applied => report.applied += 1,
                        Disposition::Skipped => report.skipped += 1,
                        Disposition::Rejected(reason) => {
                            tracing::warn!(
                                seq = queued.seq,
                                event_id = %queued.event.event_id,
                                session = %session,
                                %reason,
                                "event rejected by governor"
                            );
                            report.rejected += 1;
                        }
                    }
                    if let Err(e) = self.queue.ack(queued.seq).await {
                        tracing::warn!(seq = queued.seq, error = %e, "ack failed; event will be redelivered");
                    }
                }
                Err(e) => {
                    tracing::warn!(seq = queued.seq, session = %session, error = %e, "event failed");
                    self.nack(queued.seq, &e.to_string(), max_attempts, &mut report).await;
                    failed = Some(e.to_string());
                }
            }
        }
        report
    }

    async fn nack(&self, seq: i64, reason: &str, max_attempts: u32, report: &mut BatchReport) {
        match self.queue.nack(seq, reason, max_attempts).await {
            Ok(QueueStatus::Dead) => {
                tracing::error!(seq, %reason, "event moved to dead letter after repeated failures");
                report.dead += 1;
            }
            Ok(_) => report.retried += 1,
            Err(e) => tracing::warn!(seq, error = %e, "nack failed; lease will lapse"),
        }
    }

    /// Apply one event. Governance rejections are returned as
    /// `Disposition::Rejected`; only transient failures are errors.
    async fn apply(&self, event: &RawEvent) -> DomainResult<Disposition> {
        let result = match event.kind {
            RawEventKind::ToolStart => self.apply_start(event).await,
            RawEventKind::ToolSuccess | RawEventKind::ToolFailure => self.apply_completion(event).await,
            RawEventKind::Note => self.apply_note(event).await,
        };
        match result {
            Ok(disposition) => Ok(disposition),
            Err(GovernanceError::Domain(e)) if is_transient(&e) => Err(e),
            Err(e) => Ok(Disposition::Rejected(format!("{e}; {}", e.remediation()))),
        }
    }

    async fn apply_start(&self, event: &RawEvent) -> GovernanceResult<Disposition> {
        let Some(action) = event.action.clone() else {
            return Err(DomainError::ValidationFailed("tool_start event has no action".into()).into());
        };
        let payload: StartPayload = parse_payload(&event.payload)?;

        let episode_id = match self.governor.open_episode_for_session(&event.session_id).await? {
            Some(id) => id,
            None => {
                let goal = payload
                    .goal
                    .clone()
                    .unwrap_or_else(|| format!("session {}", event.session_id));
                let criterion = payload.success_criterion.clone().unwrap_or_default();
                self.governor
                    .open_episode(&event.session_id, &goal, &criterion, Vec::new(), None)
                    .await?
                    .id
            }
        };

        let packet = start_packet(action, payload);
        self.governor
            .begin_step(episode_id, packet, Some(event.event_id.clone()))
            .await?;
        Ok(Disposition::Applied)
    }

    async fn apply_completion(&self, event: &RawEvent) -> GovernanceResult<Disposition> {
        let Some(episode_id) = self.governor.open_episode_for_session(&event.session_id).await? else {
            tracing::debug!(event_id = %event.event_id, "completion without an open episode");
            return Ok(Disposition::Skipped);
        };
        let Some(step_id) = self.governor.episode(episode_id).await?.active_step else {
            tracing::debug!(event_id = %event.event_id, "completion without an in-flight step");
            return Ok(Disposition::Skipped);
        };
        let raw = event.outcome.clone().unwrap_or_default();

        let steps = self.governor.steps(episode_id).await?;
        let applied = steps.iter().any(|s| {
            s.outcome
                .as_ref()
                .and_then(|o| o.completion_event_id.as_deref())
                == Some(event.event_id.as_str())
        });
        if applied {
            tracing::debug!(event_id = %event.event_id, "completion already applied");
            return Ok(Disposition::Skipped);
        }
        if let Some(start_id) = raw.start_event_id.as_deref() {
            let active_source = steps
                .iter()
                .find(|s| s.id == step_id)
                .and_then(|s| s.source_event_id.as_deref());
            if active_source != Some(start_id) {
                tracing::debug!(
                    event_id = %event.event_id,
                    start_event_id = start_id,
                    "completion does not answer the in-flight step"
                );
                return Ok(Disposition::Skipped);
            }
        }

        let failed = event.kind == RawEventKind::ToolFailure;
        let mut observation = observation_from(raw, failed);
        observation.event_id = Some(event.event_id.clone());
        match self.governor.complete_step(episode_id, step_id, observation).await {
            Ok(_) => Ok(Disposition::Applied),
            Err(GovernanceError::StepAlreadyCompleted(_)) => Ok(Disposition::Skipped),
            Err(e) => Err(e),
        }
    }

    async fn apply_note(&self, event: &RawEvent) -> GovernanceResult<Disposition> {
        let payload: NotePayload = parse_payload(&event.payload)?;
        let Some(episode_id) = self.governor.open_episode_for_session(&event.session_id).await? else {
            return Ok(Disposition::Skipped);
        };
        let text = payload.text.as_deref().map(str::trim).filter(|t| !t.is_empty());

        if let Some(close) = payload.close.as_deref() {
            let outcome = match close {
                "succeeded" => TerminalOutcome::Succeeded,
                "aborted" => TerminalOutcome::Aborted,
                other => {
                    return Err(DomainError::ValidationFailed(format!(
                        "unknown close outcome '{other}'"
                    ))
                    .into())
                }
            };
            self.governor
                .close_episode(episode_id, outcome, text.unwrap_or("closed by host"))
                .await?;
            return Ok(Disposition::Applied);
        }
        if let Some(phase) = payload.phase.as_deref() {
            let to = Phase::from_str(phase).ok_or_else(|| {
                DomainError::ValidationFailed(format!("unknown phase '{phase}'"))
            })?;
            self.governor
                .transition(episode_id, to, text.unwrap_or("phase complete"))
                .await?;
            return Ok(Disposition::Applied);
        }
        match text {
            Some(text) => {
                self.governor.add_note(episode_id, text).await?;
                Ok(Disposition::Applied)
            }
            None => Ok(Disposition::Skipped),
        }
    }
}

fn is_transient(e: &DomainError) -> bool {
    matches!(
        e,
        DomainError::DatabaseError(_) | DomainError::ConcurrencyConflict { .. }
    )
}

fn parse_payload<T: serde::de::DeserializeOwned + Default>(value: &serde_json::Value) -> DomainResult<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| DomainError::ValidationFailed(format!("malformed event payload: {e}")))
}

/// Group claimed events by session, keeping append order within each group.
fn group_by_session(events: Vec<QueuedEvent>) -> Vec<(String, Vec<QueuedEvent>)> {
    let mut order: Vec<(String, Vec<QueuedEvent>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for event in events {
        let session = event.event.session_id.clone();
        match index.get(&session) {
            Some(&i) => order[i].1.push(event),
            None => {
                index.insert(session.clone(), order.len());
                order.push((session, vec![event]));
            }
        }
    }
    for (_, group) in &mut order {
        group.sort_by_key(|e| e.seq);
    }
    order
}

fn start_packet(action: ActionDescriptor, payload: StartPayload) -> DecisionPacket {
    let intent = payload
        .intent
        .filter(|i| !i.trim().is_empty())
        .unwrap_or_else(|| {
            if action.summary.trim().is_empty() {
                action.query_text()
            } else {
                action.summary.clone()
            }
        });
    let prediction = Prediction::new(
        payload.prediction.unwrap_or_else(|| DEFAULT_PREDICTION.to_string()),
        payload.expected.unwrap_or(OutcomeClass::Success),
    );
    let mut packet = DecisionPacket::new(
        intent,
        action,
        prediction,
        payload.confidence.unwrap_or(DEFAULT_CONFIDENCE),
    );
    packet.rejected_alternatives = payload.alternatives;
    packet.assumptions = payload.assumptions;
    if let Some(reviewed) = payload.none_relevant {
        packet = packet.declaring_none_relevant(reviewed);
    } else if !payload.cite.is_empty() {
        packet = packet.citing(payload.cite);
    }
    packet
}

fn observation_from(raw: RawOutcome, failed: bool) -> Observation {
    let summary = if raw.summary.trim().is_empty() {
        match (&raw.error, failed) {
            (Some(error), _) => error.clone(),
            (None, true) => "tool failed".to_string(),
            (None, false) => "tool succeeded".to_string(),
        }
    } else {
        raw.summary
    };
    let default_class = if failed {
        OutcomeClass::Failure
    } else {
        OutcomeClass::Success
    };
    let mut observation = if failed {
        Observation::failure(summary, raw.error.clone().unwrap_or_default())
    } else {
        Observation::success(summary)
    };
    observation.outcome = Some(raw.outcome.unwrap_or(default_class));
    observation.error = raw.error.filter(|e| !e.trim().is_empty());
    observation.state_changed = raw.state_changed;
    observation.evidence = raw.evidence;
    observation.lesson = raw.lesson;
    observation.validation_method = raw.validation_method;
    observation
}
