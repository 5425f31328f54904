//! The per-run pipeline.
//!
//! Every invocation builds a fresh [`BackupRun`] and walks the same
//! sequence: preflight -> inspect -> transfer -> plan -> prune. Nothing
//! persists between runs except the snapshot directories and the latest
//! marker; planning is recomputed from the directory listing every time,
//! which makes a crashed run safe to retry as-is.

use crate::config::Config;
use crate::dest::Destination;
use crate::error::Result;
use crate::lock::RunLock;
use crate::retention;
use crate::transfer::Orchestrator;
use crate::{preflight, prune};
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

/// State for one backup run, constructed fresh per invocation.
pub struct BackupRun {
    config: Config,
    dest: Destination,
    sources: Vec<crate::endpoint::Endpoint>,
    rsync_program: String,
}

impl BackupRun {
    pub fn new(config: Config) -> Self {
        let dest = Destination::new(config.destination_endpoint());
        let sources = config.source_endpoints();
        Self {
            config,
            dest,
            sources,
            rsync_program: "rsync".to_owned(),
        }
    }

    /// Override the transfer program to invoke instead of `rsync`.
    pub fn with_rsync_program(mut self, program: &str) -> Self {
        self.rsync_program = program.to_owned();
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.dest
    }

    /// Execute the whole pipeline. A failure before publication leaves
    /// the destination exactly as it was; pruning failures are reported
    /// as warnings and do not fail the run.
    pub async fn execute(&self) -> Result<()> {
        let started = Instant::now();
        let _lock = RunLock::acquire(&self.config.destination)?;

        info!("start backup to {}", self.dest.root());
        self.dest.ensure_root().await?;

        let stat_before = self.dest.statvfs().await?;
        preflight::check(&stat_before, &self.config.free_space)?;

        let snapshots = self.dest.list_snapshots().await?;
        let latest = self.dest.latest_status().await?;
        info!("{} existing snapshot(s) at destination", snapshots.len());

        let now = Utc::now().naive_utc();
        let orchestrator = Orchestrator::new(
            &self.dest,
            &self.sources,
            &self.config.exclude,
            self.config.rsh_command.as_deref(),
        )
        .with_rsync_program(&self.rsync_program);
        let new_snapshot = orchestrator.run(!snapshots.is_empty(), &latest, now).await?;

        let mut all = snapshots;
        all.push(new_snapshot);
        all.sort();
        let plan = retention::plan(&all, &self.config.smart_remove, now);
        let outcome = prune::prune(&self.dest, &plan.remove).await;
        if !outcome.failures.is_empty() {
            warn!(
                "{} snapshot(s) could not be pruned; disk space reclamation is delayed",
                outcome.failures.len()
            );
        }
        info!("keeping {} snapshot(s), removed {}", plan.keep.len(), outcome.removed);

        preflight::log_stat("filesystem before backup", &stat_before);
        preflight::log_stat("filesystem after backup", &self.dest.statvfs().await?);
        info!("all done, backup runtime: {:?}", started.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dest::LatestStatus;
    use crate::error::Error;
    use crate::preflight::FreeSpaceRequirement;
    use crate::retention::RetentionPolicy;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> Config {
        Config {
            source: vec!["/home/alice".to_owned()],
            destination: dir.path().display().to_string(),
            exclude: vec![],
            smart_remove: RetentionPolicy::default(),
            free_space: FreeSpaceRequirement {
                min_space: 0,
                min_inodes: 0,
            },
            rsh_command: None,
        }
    }

    #[tokio::test]
    async fn pipeline_publishes_a_snapshot_and_marker() {
        let dir = TempDir::new().unwrap();
        let run = BackupRun::new(config_for(&dir)).with_rsync_program("true");

        run.execute().await.unwrap();

        let snapshots = run.destination().list_snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(
            run.destination().latest_status().await.unwrap(),
            LatestStatus::Valid(snapshots[0].name.clone())
        );
    }

    #[tokio::test]
    async fn preflight_failure_creates_no_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir);
        config.free_space.min_space = u64::MAX;
        let run = BackupRun::new(config).with_rsync_program("true");

        let err = run.execute().await.unwrap_err();

        assert!(matches!(err, Error::InsufficientSpace { .. }));
        assert!(run.destination().list_snapshots().await.unwrap().is_empty());
        assert_eq!(run.destination().latest_status().await.unwrap(), LatestStatus::Absent);
    }

    #[tokio::test]
    async fn failed_transfer_fails_the_run_cleanly() {
        let dir = TempDir::new().unwrap();
        let run = BackupRun::new(config_for(&dir)).with_rsync_program("false");

        let err = run.execute().await.unwrap_err();

        assert!(matches!(err, Error::Transfer { .. }));
        assert!(run.destination().list_snapshots().await.unwrap().is_empty());
    }
}
