//! `praxis advise`: ranked advice for a query.

use anyhow::{anyhow, Context, Result};
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::{output, short_id, truncate, CommandOutput};
use crate::domain::models::{AdviceResponse, PrecisionMode};

#[derive(Args, Debug)]
pub struct AdviseArgs {
    /// Text describing the upcoming action
    pub query: String,

    /// Maximum number of items
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Precision mode: strict, balanced or loose
    #[arg(short, long)]
    pub mode: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct AdviseOutput {
    pub query: String,
    #[serde(flatten)]
    pub advice: AdviceResponse,
}

impl CommandOutput for AdviseOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if self.advice.degraded {
            lines.push("Semantic recall unavailable; showing trigger rules only.\n".to_string());
        }
        if self.advice.is_empty() {
            lines.push(format!("No advice for '{}'.", self.query));
            return lines.join("\n");
        }
        lines.push(format!(
            "{:<10} {:<9} {:<7} {:>6}  {}",
            "ID", "SOURCE", "PRIO", "SCORE", "ADVICE"
        ));
        lines.push("-".repeat(90));
        for item in &self.advice.items {
            lines.push(format!(
                "{:<10} {:<9} {:<7} {:>6.3}  {}",
                short_id(&item.id),
                item.source.as_str(),
                item.priority.as_str(),
                item.score,
                truncate(&item.text, 60),
            ));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: AdviseArgs, json_mode: bool) -> Result<()> {
    let mode = args
        .mode
        .as_deref()
        .map(|m| PrecisionMode::from_str(m).ok_or_else(|| anyhow!("Unknown precision mode '{m}'")))
        .transpose()?;
    let ctx = AppContext::load().await?;
    let advice = ctx
        .governor
        .advise(&args.query, args.limit, mode)
        .await
        .context("Retrieval failed")?;
    output(
        &AdviseOutput {
            query: args.query,
            advice,
        },
        json_mode,
    );
    Ok(())
}
