//! `praxis policy`: manage user and learned policies.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output::{output, short_id, truncate, CommandOutput};
use crate::domain::models::{ActionCategory, Policy, PolicyStatus};

#[derive(Args, Debug)]
pub struct PolicyArgs {
    #[command(subcommand)]
    pub command: PolicyCommands,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// List policies
    List {
        /// Filter by status: proposed, active or retired
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Add an active user policy
    Add {
        statement: String,
        /// Forbidden action category (inspect, mutate, execute, verify, note)
        #[arg(long, requires = "target")]
        forbid: Option<String>,
        /// Target glob the forbid clause applies to
        #[arg(long)]
        target: Option<String>,
        #[arg(short, long, default_value = "0")]
        priority: i32,
        #[arg(long)]
        scope: Option<String>,
    },
    /// Approve a proposed policy
    Approve { id: Uuid },
    /// Retire a policy
    Retire { id: Uuid },
}

#[derive(Debug, serde::Serialize)]
pub struct PolicyListOutput {
    pub policies: Vec<Policy>,
}

impl CommandOutput for PolicyListOutput {
    fn to_human(&self) -> String {
        if self.policies.is_empty() {
            return "No policies found.".to_string();
        }
        let mut lines = vec![format!(
            "{:<10} {:<9} {:<8} {:>4}  {}",
            "ID", "STATUS", "ORIGIN", "PRIO", "STATEMENT"
        )];
        lines.push("-".repeat(90));
        for p in &self.policies {
            lines.push(format!(
                "{:<10} {:<9} {:<8} {:>4}  {}",
                short_id(&p.id),
                p.status.as_str(),
                p.origin.as_str(),
                p.priority,
                truncate(&p.statement, 56),
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct PolicyOutput {
    pub action: &'static str,
    pub policy: Policy,
}

impl CommandOutput for PolicyOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Policy {}: {}", self.action, self.policy.id),
            format!("Statement: {}", self.policy.statement),
            format!("Status: {}", self.policy.status.as_str()),
        ];
        if let Some(forbid) = &self.policy.forbids {
            lines.push(format!(
                "Forbids: {} on {}",
                forbid.category.as_str(),
                forbid.target_glob
            ));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: PolicyArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let policies = ctx.governor.policies();

    match args.command {
        PolicyCommands::List { status } => {
            let status = status
                .as_deref()
                .map(|s| PolicyStatus::from_str(s).ok_or_else(|| anyhow!("Unknown policy status '{s}'")))
                .transpose()?;
            let list = policies.list(status).await.context("Failed to list policies")?;
            output(&PolicyListOutput { policies: list }, json_mode);
        }
        PolicyCommands::Add {
            statement,
            forbid,
            target,
            priority,
            scope,
        } => {
            let forbid = match (forbid, target) {
                (Some(category), Some(glob)) => {
                    let category = ActionCategory::from_str(&category)
                        .ok_or_else(|| anyhow!("Unknown action category '{category}'"))?;
                    Some((category, glob))
                }
                _ => None,
            };
            let policy = policies
                .create(statement, forbid, priority, scope)
                .await
                .context("Failed to create policy")?;
            output(&PolicyOutput { action: "created", policy }, json_mode);
        }
        PolicyCommands::Approve { id } => {
            let policy = policies.approve(id).await.context("Failed to approve policy")?;
            output(&PolicyOutput { action: "approved", policy }, json_mode);
        }
        PolicyCommands::Retire { id } => {
            let policy = policies.retire(id).await.context("Failed to retire policy")?;
            output(&PolicyOutput { action: "retired", policy }, json_mode);
        }
    }
    Ok(())
}
