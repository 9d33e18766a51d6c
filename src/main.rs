//! Praxis CLI entry point.

use clap::Parser;

use praxis::cli::{commands, handle_error, Cli, Commands};
use praxis::domain::models::Config;
use praxis::infrastructure::config::ConfigLoader;
use praxis::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging comes up before the command so config errors are reported by the command itself.
    let logging = ConfigLoader::load()
        .map(|c| c.logging)
        .unwrap_or_else(|_| Config::default().logging);
    let _logger = match LoggerImpl::init_stderr(&LogConfig::from(&logging)) {
        Ok(logger) => Some(logger),
        Err(e) => {
            eprintln!("warning: logging disabled: {e}");
            None
        }
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Ingest(args) => commands::ingest::execute(args, cli.json).await,
        Commands::Run(args) => commands::run::execute(args, cli.json).await,
        Commands::Advise(args) => commands::advise::execute(args, cli.json).await,
        Commands::Rules(args) => commands::rules::execute(args, cli.json).await,
        Commands::Policy(args) => commands::policy::execute(args, cli.json).await,
        Commands::Trigger(args) => commands::trigger::execute(args, cli.json).await,
        Commands::Sweep(args) => commands::sweep::execute(args, cli.json).await,
        Commands::Episodes(args) => commands::episodes::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
