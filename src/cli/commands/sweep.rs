//! `praxis sweep`: run one maintenance pass now.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::services::maintenance_daemon::{MaintenanceConfig, MaintenanceDaemon, MaintenanceReport};

#[derive(Args, Debug)]
pub struct SweepArgs {}

#[derive(Debug, serde::Serialize)]
pub struct SweepOutput {
    #[serde(flatten)]
    pub report: MaintenanceReport,
}

impl CommandOutput for SweepOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        let heading = if r.is_degraded() {
            format!("Maintenance pass finished with failures: {}", r.failed_jobs.join(", "))
        } else {
            "Maintenance pass complete".to_string()
        };
        [
            heading,
            format!("  Evidence deleted:   {}", r.evidence_deleted),
            format!("  Insights expired:   {}", r.insights_expired),
            format!("  Steps timed out:    {}", r.steps_timed_out),
            format!("  Leases released:    {}", r.leases_released),
            format!("  Episodes recovered: {}", r.episodes_recovered),
        ]
        .join("\n")
    }
}

pub async fn execute(_args: SweepArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let daemon = MaintenanceDaemon::new(
        Arc::clone(&ctx.governor),
        Arc::clone(&ctx.queue),
        MaintenanceConfig::default(),
    );
    let report = daemon.run_once().await;
    let degraded = report.is_degraded();
    output(&SweepOutput { report }, json_mode);
    if degraded {
        anyhow::bail!("One or more maintenance jobs failed");
    }
    Ok(())
}
