//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use crate::cli::commands::{
    advise::AdviseArgs, episodes::EpisodesArgs, ingest::IngestArgs, init::InitArgs,
    policy::PolicyArgs, rules::RulesArgs, run::RunArgs, sweep::SweepArgs, trigger::TriggerArgs,
};

#[derive(Parser)]
#[command(name = "praxis")]
#[command(about = "Praxis - action governance for coding agents", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize Praxis configuration and database
    Init(InitArgs),

    /// Enqueue hook events from a JSON-lines file
    Ingest(IngestArgs),

    /// Process queued events and run maintenance
    Run(RunArgs),

    /// Ranked advice for an upcoming action
    Advise(AdviseArgs),

    /// Distilled rules, most confident first
    Rules(RulesArgs),

    /// Policy management commands
    Policy(PolicyArgs),

    /// Trigger rule management commands
    Trigger(TriggerArgs),

    /// Run one maintenance pass
    Sweep(SweepArgs),

    /// List or inspect episodes
    Episodes(EpisodesArgs),
}
