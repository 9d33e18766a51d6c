//! `praxis run`: consume the event queue with the maintenance daemon alongside.

use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::services::{BatchReport, EventWorker, MaintenanceConfig, MaintenanceDaemon};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Drain the queue once and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    pub mode: &'static str,
    pub report: BatchReport,
    pub episodes_aborted: usize,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        let mut lines = vec![format!(
            "Processed {} event(s): {} applied, {} rejected, {} skipped, {} retried, {} dead",
            r.claimed, r.applied, r.rejected, r.skipped, r.retried, r.dead
        )];
        if self.episodes_aborted > 0 {
            lines.push(format!("Aborted {} open episode(s) on shutdown", self.episodes_aborted));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: RunArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let worker = Arc::new(EventWorker::new(Arc::clone(&ctx.queue), Arc::clone(&ctx.governor)));

    if args.once {
        let report = worker.drain().await?;
        let recovered = ctx.governor.flush_pending().await;
        if recovered > 0 {
            tracing::info!(recovered, "flushed unpersisted episodes");
        }
        output(
            &RunOutput {
                mode: "once",
                report,
                episodes_aborted: 0,
            },
            json_mode,
        );
        return Ok(());
    }

    let daemon = MaintenanceDaemon::new(
        Arc::clone(&ctx.governor),
        Arc::clone(&ctx.queue),
        MaintenanceConfig::with_interval(Duration::from_secs(ctx.config.evidence.sweep_interval_secs)),
    );
    let daemon_handle = daemon.handle();
    let mut daemon_events = daemon.spawn();
    tokio::spawn(async move {
        while let Some(event) = daemon_events.recv().await {
            tracing::debug!(?event, "maintenance event");
        }
    });

    let worker_handle = worker.handle();
    let running = Arc::clone(&worker);
    let task = tokio::spawn(async move { running.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    worker_handle.stop();
    daemon_handle.stop();
    let status = task.await?;

    output(
        &RunOutput {
            mode: "continuous",
            report: status.totals,
            episodes_aborted: status.aborted,
        },
        json_mode,
    );
    Ok(())
}
