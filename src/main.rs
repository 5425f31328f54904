//! timevault - Time Machine style incremental backups driven by rsync.
//!
//! Main binary entry point for the command-line interface.

use clap::Parser;
use std::process::ExitCode;
use timevault::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = timevault::logging::init(cli.log.as_deref(), cli.verbose) {
        eprintln!("cannot initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run => timevault::cli::run::run(&cli).await,
        Commands::List => timevault::cli::list::run(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            tracing::info!("backup task aborted");
            ExitCode::FAILURE
        }
    }
}
