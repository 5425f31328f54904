//! Command-line interface for timevault.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod list;
pub mod run;

/// Time Machine style incremental backups driven by rsync
#[derive(Parser)]
#[command(name = "timevault")]
#[command(about = "Incremental hard-link snapshots with tiered retention")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Alternative config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Append log output to this file as well as stdout
    #[arg(short, long, global = true)]
    pub log: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Take a snapshot and prune snapshots falling out of retention
    Run,
    /// Show existing snapshots and what the retention planner would do
    List,
}
