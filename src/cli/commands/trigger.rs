//! `praxis trigger`: manage trigger rules.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};

use crate::cli::context::AppContext;
use crate::cli::output::{output, short_id, truncate, CommandOutput};
use crate::domain::models::Priority;
use crate::services::trigger_rules::TriggerRule;

#[derive(Args, Debug)]
pub struct TriggerArgs {
    #[command(subcommand)]
    pub command: TriggerCommands,
}

#[derive(Subcommand, Debug)]
pub enum TriggerCommands {
    /// List all trigger rules
    List {
        /// Only show enabled rules
        #[arg(long)]
        enabled_only: bool,
    },
    /// Add a trigger rule
    Add {
        /// Unique rule name
        name: String,
        /// Case-insensitive regex matched against the query text
        pattern: String,
        /// Advice surfaced when the pattern matches
        advice: String,
        /// Priority: background, normal, high or critical
        #[arg(short, long, default_value = "normal")]
        priority: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct TriggerRuleOutput {
    pub id: String,
    pub name: String,
    pub pattern: String,
    pub advice: String,
    pub priority: Priority,
    pub enabled: bool,
    pub fire_count: u64,
    pub last_fired: Option<String>,
    pub distillation_id: Option<String>,
}

impl From<&TriggerRule> for TriggerRuleOutput {
    fn from(rule: &TriggerRule) -> Self {
        Self {
            id: rule.id.to_string(),
            name: rule.name.clone(),
            pattern: rule.pattern.clone(),
            advice: rule.advice.clone(),
            priority: rule.priority,
            enabled: rule.enabled,
            fire_count: rule.fire_count,
            last_fired: rule.last_fired.map(|t| t.to_rfc3339()),
            distillation_id: rule.distillation_id.map(|id| id.to_string()),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TriggerListOutput {
    pub rules: Vec<TriggerRuleOutput>,
    pub total: usize,
}

impl CommandOutput for TriggerListOutput {
    fn to_human(&self) -> String {
        if self.rules.is_empty() {
            return "No trigger rules found.".to_string();
        }

        let mut lines = vec![format!("Found {} trigger rule(s):\n", self.total)];
        lines.push(format!(
            "{:<10} {:<28} {:<8} {:<8} {:<6} {}",
            "ID", "NAME", "PRIO", "ENABLED", "FIRED", "ADVICE"
        ));
        lines.push("-".repeat(100));
        for rule in &self.rules {
            lines.push(format!(
                "{:<10} {:<28} {:<8} {:<8} {:<6} {}",
                rule.id.chars().take(8).collect::<String>(),
                truncate(&rule.name, 26),
                rule.priority.as_str(),
                if rule.enabled { "yes" } else { "no" },
                rule.fire_count,
                truncate(&rule.advice, 40),
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TriggerAddOutput {
    pub rule: TriggerRuleOutput,
}

impl CommandOutput for TriggerAddOutput {
    fn to_human(&self) -> String {
        format!(
            "Trigger rule '{}' added ({})\nPattern: {}\nAdvice: {}",
            self.rule.name,
            self.rule.id,
            self.rule.pattern,
            self.rule.advice
        )
    }
}

pub async fn execute(args: TriggerArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let triggers = ctx.governor.triggers();

    match args.command {
        TriggerCommands::List { enabled_only } => {
            let rules = triggers.list_rules().await.context("Failed to list trigger rules")?;
            let rules: Vec<TriggerRuleOutput> = rules
                .iter()
                .filter(|r| !enabled_only || r.enabled)
                .map(TriggerRuleOutput::from)
                .collect();
            let total = rules.len();
            output(&TriggerListOutput { rules, total }, json_mode);
        }
        TriggerCommands::Add {
            name,
            pattern,
            advice,
            priority,
        } => {
            let priority = Priority::from_str(&priority)
                .ok_or_else(|| anyhow!("Unknown priority '{priority}'"))?;
            let rule = triggers
                .add_rule(TriggerRule::new(name, pattern, advice, priority))
                .await
                .context("Failed to add trigger rule")?;
            tracing::debug!(rule_id = %short_id(&rule.id), "trigger rule stored");
            output(
                &TriggerAddOutput {
                    rule: TriggerRuleOutput::from(&rule),
                },
                json_mode,
            );
        }
    }
    Ok(())
}
