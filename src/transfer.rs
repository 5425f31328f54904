//! Transfer orchestration.
//!
//! One run produces one snapshot: seed the staging directory as a
//! hard-link clone of the previous snapshot, let rsync's own change
//! detection materialize only the entries that differ, then publish the
//! directory under its final name with a single rename and re-point the
//! `latest` marker. Any failure (or ctrl-c) before publication removes
//! the staging directory and leaves the destination exactly as it was.

use crate::dest::{Destination, LatestStatus};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use chrono::NaiveDateTime;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Fixed rsync argument set: archive-equivalent preservation flags plus
/// deletion of entries that vanished from (or are excluded at) the
/// source, so a seeded entry is replaced exactly when its source changed.
pub const RSYNC_ARGS: &[&str] = &[
    "--delete",
    "--delete-excluded",
    "--group",
    "--hard-links",
    "--itemize-changes",
    "--links",
    "--numeric-ids",
    "--one-file-system",
    "--owner",
    "--perms",
    "--progress",
    "--recursive",
    "--relative",
    "--times",
    "-D",
    "-q",
];

/// Human-readable meaning of rsync's documented exit codes.
fn describe_rsync_exit(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "syntax or usage error",
        2 => "protocol incompatibility",
        3 => "errors selecting input/output files, dirs",
        4 => "requested action not supported",
        5 => "error starting client-server protocol",
        6 => "daemon unable to append to log-file",
        10 => "error in socket I/O",
        11 => "error in file I/O",
        12 => "error in rsync protocol data stream",
        13 => "errors with program diagnostics",
        14 => "error in IPC code",
        20 => "received SIGUSR1 or SIGINT",
        21 => "some error returned by waitpid()",
        22 => "error allocating core memory buffers",
        23 => "partial transfer due to error",
        24 => "partial transfer due to vanished source files",
        25 => "the --max-delete limit stopped deletions",
        30 => "timeout in data send/receive",
        35 => "timeout waiting for daemon connection",
        _ => "unknown rsync exit code",
    }
}

/// Builds and issues the snapshot-producing operation for one run.
pub struct Orchestrator<'a> {
    dest: &'a Destination,
    sources: &'a [Endpoint],
    excludes: &'a [String],
    rsh_command: Option<&'a str>,
    rsync_program: &'a str,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        dest: &'a Destination,
        sources: &'a [Endpoint],
        excludes: &'a [String],
        rsh_command: Option<&'a str>,
    ) -> Self {
        Self {
            dest,
            sources,
            excludes,
            rsh_command,
            rsync_program: "rsync",
        }
    }

    /// Override the transfer program to invoke instead of `rsync`.
    pub fn with_rsync_program(mut self, program: &'a str) -> Self {
        self.rsync_program = program;
        self
    }

    /// Produce and publish the snapshot for a run started at `now`.
    ///
    /// `have_snapshots` and `latest` come from the destination inspection
    /// done at the start of the run.
    pub async fn run(
        &self,
        have_snapshots: bool,
        latest: &LatestStatus,
        now: NaiveDateTime,
    ) -> Result<Snapshot> {
        let snapshot = Snapshot::at(now);
        let staging = snapshot.staging_name();

        let seed = match (have_snapshots, latest) {
            (true, LatestStatus::Valid(name)) => Some(name.clone()),
            (true, _) => return self.recover_marker(&snapshot).await,
            (false, _) => {
                // A marker without any snapshot is stale; clear it.
                if *latest != LatestStatus::Absent {
                    self.dest.remove_marker().await?;
                }
                None
            }
        };

        match seed {
            Some(previous) => {
                info!("seeding {} as a hard-link clone of {previous}", snapshot.name);
                if let Err(e) = self.dest.clone_tree(&previous, &staging).await {
                    self.abandon(&staging).await;
                    return Err(Error::Transfer {
                        src: previous,
                        cause: format!("hard-link seeding failed: {e}"),
                    });
                }
            }
            None => {
                info!("no previous snapshot, starting {} empty", snapshot.name);
                self.dest.mkdir(&staging).await.map_err(|e| Error::Transfer {
                    src: self.dest.root().to_string(),
                    cause: format!("cannot create staging directory: {e}"),
                })?;
            }
        }

        for source in self.sources {
            if let Err(e) = self.sync_source(source, &staging).await {
                warn!("transfer failed, removing staging directory {staging}");
                self.abandon(&staging).await;
                return Err(e);
            }
        }

        if let Err(e) = self.dest.rename(&staging, &snapshot.name).await {
            self.abandon(&staging).await;
            return Err(Error::Transfer {
                src: self.dest.root().to_string(),
                cause: format!("cannot publish snapshot: {e}"),
            });
        }
        self.dest.point_latest(&snapshot.name).await.map_err(|e| Error::Transfer {
            src: self.dest.root().to_string(),
            cause: format!("cannot update latest marker: {e}"),
        })?;

        info!("published snapshot {}", snapshot.name);
        Ok(snapshot)
    }

    /// Snapshots exist but the `latest` marker is missing or broken. The
    /// hard-link seed would have nothing trustworthy to clone, so re-create
    /// the marker against a fresh empty snapshot and abort the run; the
    /// next run starts from a consistent (if empty) state.
    async fn recover_marker(&self, snapshot: &Snapshot) -> Result<Snapshot> {
        error!("the latest marker is missing or broken; re-creating it empty for the next run");
        self.dest.mkdir(&snapshot.name).await?;
        self.dest.point_latest(&snapshot.name).await?;
        Err(Error::LatestMarker(
            "marker was missing or broken while snapshots exist; \
             re-created pointing at a fresh empty snapshot"
                .into(),
        ))
    }

    async fn abandon(&self, staging: &str) {
        if let Err(e) = self.dest.remove_tree(staging).await {
            warn!("could not remove staging directory {staging}: {e}");
        }
    }

    fn rsync_argv(&self, source: &Endpoint, staging: &str) -> Vec<String> {
        let mut argv: Vec<String> = RSYNC_ARGS.iter().map(|s| (*s).to_owned()).collect();
        if let Some(rsh) = self.rsh_command {
            argv.push("-e".to_owned());
            argv.push(rsh.to_owned());
        }
        for pattern in self.excludes {
            argv.push(format!("--exclude={pattern}"));
        }
        argv.push(source.rsync_arg());
        argv.push(self.dest.rsync_target(staging));
        argv
    }

    /// Run one rsync invocation into the staging directory. Cancellable:
    /// ctrl-c kills the child and surfaces as `Error::Cancelled`, which
    /// the caller maps to the same cleanup as a failed transfer.
    async fn sync_source(&self, source: &Endpoint, staging: &str) -> Result<()> {
        let argv = self.rsync_argv(source, staging);
        info!("running: {} {}", self.rsync_program, argv.join(" "));

        let child = Command::new(self.rsync_program)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transfer {
                src: source.to_string(),
                cause: format!("cannot start {}: {e}", self.rsync_program),
            })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|e| Error::Transfer {
                src: source.to_string(),
                cause: format!("waiting for {} failed: {e}", self.rsync_program),
            })?,
            _ = tokio::signal::ctrl_c() => {
                warn!("cancelled, terminating transfer of {source}");
                return Err(Error::Cancelled);
            }
        };

        if output.status.success() {
            info!("transferred {source}");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let cause = match output.status.code() {
            Some(code) => format!(
                "rsync exit {code} ({}): {}",
                describe_rsync_exit(code),
                stderr.trim()
            ),
            None => format!("rsync terminated by signal: {}", stderr.trim()),
        };
        Err(Error::Transfer {
            src: source.to_string(),
            cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn staging_leftovers(dir: &TempDir) -> Vec<String> {
        fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".in-progress-"))
            .collect()
    }

    #[test]
    fn argv_carries_excludes_rsh_and_endpoints() {
        let dest = Destination::new(Endpoint::parse("/srv/backups"));
        let sources = [Endpoint::parse("/home/alice")];
        let excludes = ["*.cache".to_owned(), "node_modules".to_owned()];
        let orchestrator = Orchestrator::new(&dest, &sources, &excludes, Some("ssh -p 2222"));

        let argv = orchestrator.rsync_argv(&sources[0], ".in-progress-x");

        assert!(argv.contains(&"--delete".to_owned()));
        assert!(argv.contains(&"--hard-links".to_owned()));
        let e_flag = argv.iter().position(|a| a == "-e").unwrap();
        assert_eq!(argv[e_flag + 1], "ssh -p 2222");
        assert!(argv.contains(&"--exclude=*.cache".to_owned()));
        assert!(argv.contains(&"--exclude=node_modules".to_owned()));
        assert_eq!(argv[argv.len() - 2], "/home/alice");
        assert_eq!(argv[argv.len() - 1], "/srv/backups/.in-progress-x");
    }

    #[test]
    fn remote_destination_argv_uses_host_form() {
        let dest = Destination::new(Endpoint::parse("alice@nas:/volume1/tm"));
        let sources = [Endpoint::parse("/home/alice")];
        let orchestrator = Orchestrator::new(&dest, &sources, &[], None);

        let argv = orchestrator.rsync_argv(&sources[0], ".in-progress-x");

        assert_eq!(argv[argv.len() - 1], "alice@nas:/volume1/tm/.in-progress-x");
        assert!(!argv.contains(&"-e".to_owned()));
    }

    #[tokio::test]
    async fn first_run_publishes_an_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let dest = Destination::new(Endpoint::Local(dir.path().to_path_buf()));
        let sources = [Endpoint::parse("/home/alice")];
        let orchestrator = Orchestrator::new(&dest, &sources, &[], None).with_rsync_program("true");

        let snapshot = orchestrator
            .run(false, &LatestStatus::Absent, at(2026, 8, 30, 14))
            .await
            .unwrap();

        assert!(dir.path().join(&snapshot.name).is_dir());
        assert_eq!(dest.latest_status().await.unwrap(), LatestStatus::Valid(snapshot.name.clone()));
        assert!(staging_leftovers(&dir).is_empty());
    }

    #[tokio::test]
    async fn second_run_seeds_from_the_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let dest = Destination::new(Endpoint::Local(dir.path().to_path_buf()));
        let prev = "2026-08-29_14:00:00_GMT";
        fs::create_dir(dir.path().join(prev)).unwrap();
        fs::write(dir.path().join(prev).join("unchanged.txt"), b"same bytes").unwrap();
        dest.point_latest(prev).await.unwrap();

        let sources = [Endpoint::parse("/home/alice")];
        let orchestrator = Orchestrator::new(&dest, &sources, &[], None).with_rsync_program("true");
        let snapshot = orchestrator
            .run(true, &LatestStatus::Valid(prev.to_owned()), at(2026, 8, 30, 14))
            .await
            .unwrap();

        // Unchanged entries are link-identical to the previous snapshot.
        let old = fs::metadata(dir.path().join(prev).join("unchanged.txt")).unwrap();
        let new = fs::metadata(dir.path().join(&snapshot.name).join("unchanged.txt")).unwrap();
        assert_eq!(old.ino(), new.ino());
        assert_eq!(dest.latest_status().await.unwrap(), LatestStatus::Valid(snapshot.name));
    }

    #[tokio::test]
    async fn failed_transfer_leaves_destination_untouched() {
        let dir = TempDir::new().unwrap();
        let dest = Destination::new(Endpoint::Local(dir.path().to_path_buf()));
        let prev = "2026-08-29_14:00:00_GMT";
        fs::create_dir(dir.path().join(prev)).unwrap();
        fs::write(dir.path().join(prev).join("data"), b"payload").unwrap();
        dest.point_latest(prev).await.unwrap();

        let sources = [Endpoint::parse("/home/alice")];
        let orchestrator = Orchestrator::new(&dest, &sources, &[], None).with_rsync_program("false");
        let err = orchestrator
            .run(true, &LatestStatus::Valid(prev.to_owned()), at(2026, 8, 30, 14))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transfer { .. }));
        let snapshots = dest.list_snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, prev);
        assert_eq!(dest.latest_status().await.unwrap(), LatestStatus::Valid(prev.to_owned()));
        assert!(staging_leftovers(&dir).is_empty());
    }

    #[tokio::test]
    async fn broken_marker_aborts_and_recreates_it() {
        let dir = TempDir::new().unwrap();
        let dest = Destination::new(Endpoint::Local(dir.path().to_path_buf()));
        fs::create_dir(dir.path().join("2026-08-29_14:00:00_GMT")).unwrap();
        // Marker points at a snapshot that no longer exists.
        std::os::unix::fs::symlink("2026-08-01_00:00:00_GMT", dir.path().join("latest")).unwrap();

        let sources = [Endpoint::parse("/home/alice")];
        let orchestrator = Orchestrator::new(&dest, &sources, &[], None).with_rsync_program("true");
        let now = at(2026, 8, 30, 14);
        let err = orchestrator.run(true, &LatestStatus::Broken, now).await.unwrap_err();

        assert!(matches!(err, Error::LatestMarker(_)));
        let fresh = Snapshot::at(now);
        assert_eq!(dest.latest_status().await.unwrap(), LatestStatus::Valid(fresh.name.clone()));
        assert!(dir.path().join(&fresh.name).is_dir());
    }

    #[test]
    fn decodes_known_rsync_exit_codes() {
        assert_eq!(describe_rsync_exit(23), "partial transfer due to error");
        assert_eq!(describe_rsync_exit(30), "timeout in data send/receive");
        assert_eq!(describe_rsync_exit(99), "unknown rsync exit code");
    }
}
