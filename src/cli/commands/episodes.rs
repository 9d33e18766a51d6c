//! `praxis episodes`: inspect episodes and their steps.

use anyhow::{Context, Result};
use clap::Args;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output::{output, short_id, truncate, CommandOutput};
use crate::domain::models::{Episode, Step};

#[derive(Args, Debug)]
pub struct EpisodesArgs {
    /// Show one episode with its steps
    pub id: Option<Uuid>,

    /// Only list open episodes
    #[arg(long)]
    pub open: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct EpisodeListOutput {
    pub episodes: Vec<Episode>,
}

impl CommandOutput for EpisodeListOutput {
    fn to_human(&self) -> String {
        if self.episodes.is_empty() {
            return "No episodes found.".to_string();
        }
        let mut lines = vec![format!(
            "{:<10} {:<16} {:<12} {:<7} {:>5}  {}",
            "ID", "SESSION", "PHASE", "STATUS", "STEPS", "GOAL"
        )];
        lines.push("-".repeat(90));
        for e in &self.episodes {
            lines.push(format!(
                "{:<10} {:<16} {:<12} {:<7} {:>5}  {}",
                short_id(&e.id),
                truncate(&e.session_id, 14),
                e.phase.as_str(),
                e.status.as_str(),
                e.steps_taken,
                truncate(&e.goal, 40),
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EpisodeDetailOutput {
    pub episode: Episode,
    pub steps: Vec<Step>,
}

impl CommandOutput for EpisodeDetailOutput {
    fn to_human(&self) -> String {
        let e = &self.episode;
        let mut lines = vec![
            format!("Episode {}", e.id),
            format!("Session: {}", e.session_id),
            format!("Goal: {}", e.goal),
            format!("Phase: {} ({})", e.phase.as_str(), e.status.as_str()),
            format!(
                "Budget: {}/{} steps, {}s",
                e.steps_taken, e.budget.max_steps, e.budget.max_seconds
            ),
        ];
        if !e.frozen_targets.is_empty() {
            let frozen: Vec<&str> = e.frozen_targets.iter().map(String::as_str).collect();
            lines.push(format!("Frozen: {}", frozen.join(", ")));
        }
        if let Some(done) = &e.completion {
            lines.push(format!("Closed: {}", done.summary));
        }
        lines.push(String::new());
        for step in &self.steps {
            let eval = step
                .evaluation()
                .map(|ev| format!("{ev:?}").to_lowercase())
                .unwrap_or_else(|| "pending".to_string());
            lines.push(format!(
                "#{:<3} {:<12} {:<8} {} {}",
                step.sequence,
                step.phase.as_str(),
                eval,
                step.packet.action.tool,
                truncate(&step.packet.intent, 50),
            ));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: EpisodesArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    match args.id {
        Some(id) => {
            let episode = ctx.governor.episode(id).await.context("Episode not found")?;
            let steps = ctx.governor.steps(id).await.context("Failed to load steps")?;
            output(&EpisodeDetailOutput { episode, steps }, json_mode);
        }
        None => {
            let episodes = ctx
                .governor
                .list_episodes(args.open)
                .await
                .context("Failed to list episodes")?;
            output(&EpisodeListOutput { episodes }, json_mode);
        }
    }
    Ok(())
}
