//! `praxis rules`: the distilled-rule feed.

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::{output, short_id, truncate, CommandOutput};
use crate::domain::models::Distillation;

#[derive(Args, Debug)]
pub struct RulesArgs {
    /// Only rules at or above this confidence
    #[arg(long, default_value = "0.0")]
    pub min_confidence: f64,
}

#[derive(Debug, serde::Serialize)]
pub struct RulesOutput {
    pub rules: Vec<Distillation>,
}

impl CommandOutput for RulesOutput {
    fn to_human(&self) -> String {
        if self.rules.is_empty() {
            return "No distilled rules.".to_string();
        }
        let mut lines = vec![format!(
            "{:<10} {:<12} {:>5} {:>4} {:>4} {:<9} {}",
            "ID", "TYPE", "CONF", "VAL", "CON", "PROMOTED", "STATEMENT"
        )];
        lines.push("-".repeat(100));
        for rule in &self.rules {
            lines.push(format!(
                "{:<10} {:<12} {:>5.2} {:>4} {:>4} {:<9} {}",
                short_id(&rule.id),
                rule.kind.as_str(),
                rule.confidence,
                rule.validation_count,
                rule.contradiction_count,
                if rule.promoted_rule_id.is_some() { "yes" } else { "no" },
                truncate(&rule.statement, 50),
            ));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: RulesArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let rules = ctx
        .governor
        .distillation()
        .feed(args.min_confidence)
        .await
        .context("Failed to read distilled rules")?;
    output(&RulesOutput { rules }, json_mode);
    Ok(())
}
