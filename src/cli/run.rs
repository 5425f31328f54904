//! Run command implementation.

use crate::cli::Cli;
use crate::config::Config;
use crate::run::BackupRun;
use crate::Result;

/// Run the full backup pipeline once.
pub async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    BackupRun::new(config).execute().await
}
