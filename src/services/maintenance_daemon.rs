//! Maintenance background daemon.
//!
//! Runs scheduled housekeeping for the governance core:
//! - Sweeping evidence past its retention window
//! - Deleting expired ephemeral insights
//! - Timing out steps past their deadline
//! - Returning lapsed event-queue leases
//! - Retrying episodes that could not be persisted

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Instant};

use crate::domain::errors::DomainResult;
use crate::domain::ports::EventQueue;
use crate::services::governor::Governor;

/// Configuration for the maintenance daemon.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval between maintenance runs.
    pub interval: Duration,
    pub run_on_startup: bool,
    /// Maximum consecutive failures before stopping.
    pub max_consecutive_failures: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            run_on_startup: true,
            max_consecutive_failures: 5,
        }
    }
}

impl MaintenanceConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }
}

/// What one maintenance run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub evidence_deleted: u64,
    pub insights_expired: usize,
    pub steps_timed_out: usize,
    pub leases_released: u64,
    pub episodes_recovered: usize,
    /// Jobs that failed this run; the others still ran
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_jobs: Vec<String>,
}

impl MaintenanceReport {
    pub fn is_degraded(&self) -> bool {
        !self.failed_jobs.is_empty()
    }

    fn record<T: Default>(&mut self, job: &str, result: DomainResult<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(job, error = %e, "maintenance job failed");
                self.failed_jobs.push(job.to_string());
                T::default()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum MaintenanceEvent {
    Started,
    RunCompleted {
        run_number: u64,
        report: MaintenanceReport,
        duration_ms: u64,
    },
    RunFailed {
        run_number: u64,
        error: String,
    },
    Stopped {
        reason: StopReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TooManyFailures,
}

#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    pub running: bool,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<Instant>,
    pub total_evidence_deleted: u64,
    pub total_steps_timed_out: u64,
}

/// Handle to control the daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<DaemonStatus>>,
}

impl DaemonHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }
}

pub struct MaintenanceDaemon {
    governor: Arc<Governor>,
    queue: Arc<dyn EventQueue>,
    config: MaintenanceConfig,
    status: Arc<RwLock<DaemonStatus>>,
    stop_flag: Arc<AtomicBool>,
}

impl MaintenanceDaemon {
    pub fn new(governor: Arc<Governor>, queue: Arc<dyn EventQueue>, config: MaintenanceConfig) -> Self {
        Self {
            governor,
            queue,
            config,
            status: Arc::new(RwLock::new(DaemonStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            stop_flag: Arc::clone(&self.stop_flag),
            status: Arc::clone(&self.status),
        }
    }

    /// Spawn the daemon loop, returning a channel of its events.
    pub fn spawn(self) -> mpsc::Receiver<MaintenanceEvent> {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            self.run_loop(tx).await;
        });
        rx
    }

    async fn run_loop(self, tx: mpsc::Sender<MaintenanceEvent>) {
        self.status.write().await.running = true;
        let _ = tx.send(MaintenanceEvent::Started).await;

        let mut consecutive_failures = 0u32;
        let mut timer = interval(self.config.interval);
        // The first tick completes immediately.
        timer.tick().await;

        if self.config.run_on_startup {
            self.run_cycle(&tx, &mut consecutive_failures).await;
        }

        let reason = loop {
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }
            if consecutive_failures >= self.config.max_consecutive_failures {
                tracing::error!(consecutive_failures, "maintenance daemon stopping after repeated failures");
                break StopReason::TooManyFailures;
            }
            timer.tick().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }
            self.run_cycle(&tx, &mut consecutive_failures).await;
        };

        self.status.write().await.running = false;
        let _ = tx.send(MaintenanceEvent::Stopped { reason }).await;
    }

    async fn run_cycle(&self, tx: &mpsc::Sender<MaintenanceEvent>, consecutive_failures: &mut u32) {
        let run_number = {
            let mut status = self.status.write().await;
            status.total_runs += 1;
            status.total_runs
        };

        let start = Instant::now();
        let report = self.run_once().await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        {
            let mut status = self.status.write().await;
            status.last_run = Some(Instant::now());
            status.total_evidence_deleted += report.evidence_deleted;
            status.total_steps_timed_out += report.steps_timed_out as u64;
            if report.is_degraded() {
                status.failed_runs += 1;
            } else {
                status.successful_runs += 1;
            }
        }

        if report.is_degraded() {
            *consecutive_failures += 1;
            let _ = tx
                .send(MaintenanceEvent::RunFailed {
                    run_number,
                    error: format!("failed jobs: {}", report.failed_jobs.join(", ")),
                })
                .await;
        } else {
            *consecutive_failures = 0;
        }
        let _ = tx
            .send(MaintenanceEvent::RunCompleted {
                run_number,
                report,
                duration_ms,
            })
            .await;
    }

    /// One maintenance pass. Jobs run independently; a failing job is
    /// logged and named in the report.
    pub async fn run_once(&self) -> MaintenanceReport {
        let now = Utc::now();
        let mut report = MaintenanceReport::default();

        let sweep = self.governor.evidence().sweep(now).await.map(|s| s.deleted);
        report.evidence_deleted = report.record("evidence sweep", sweep);
        let expired = self.governor.expire_insights(now).await;
        report.insights_expired = report.record("insight expiry", expired);
        let timed_out = self.governor.timeout_overdue_steps(now).await;
        report.steps_timed_out = report.record("step timeouts", timed_out);
        let released = self.queue.release_expired_leases(now).await;
        report.leases_released = report.record("lease release", released);
        report.episodes_recovered = self.governor.flush_pending().await;

        tracing::info!(
            evidence_deleted = report.evidence_deleted,
            insights_expired = report.insights_expired,
            steps_timed_out = report.steps_timed_out,
            leases_released = report.leases_released,
            episodes_recovered = report.episodes_recovered,
            failed_jobs = report.failed_jobs.len(),
            "maintenance run completed"
        );
        report
    }
}
