//! Destination inspection and filesystem operations.
//!
//! [`Destination`] is the single gateway to the snapshot store root. It
//! enumerates snapshots, reports free space, and performs the directory
//! mutations the orchestrator and pruner need (staging, hard-link
//! seeding, atomic publication, deletion). Local roots use direct
//! filesystem calls; remote roots run the equivalent coreutils commands
//! over ssh, the same way the transfer tool itself reaches them.

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::snapshot::{Snapshot, LATEST_MARKER};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

/// Raw filesystem numbers for the destination, as reported by statvfs
/// locally or `stat -f` remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub block_size: u64,
    pub blocks_total: u64,
    pub blocks_avail: u64,
    pub inodes_total: u64,
    pub inodes_free: u64,
}

impl FsStat {
    pub fn bytes_avail(&self) -> u64 {
        self.blocks_avail * self.block_size
    }

    pub fn bytes_total(&self) -> u64 {
        self.blocks_total * self.block_size
    }
}

/// State of the `latest` marker at the destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestStatus {
    /// No marker present.
    Absent,
    /// Marker present but its target does not exist (or it is not a
    /// symlink at all).
    Broken,
    /// Marker resolves to the named snapshot directory.
    Valid(String),
}

/// Handle to the snapshot store root, local or remote.
pub struct Destination {
    root: Endpoint,
}

impl Destination {
    pub fn new(root: Endpoint) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Endpoint {
        &self.root
    }

    /// The rsync destination argument for a directory under the root.
    pub fn rsync_target(&self, name: &str) -> String {
        self.root.join(name).rsync_arg()
    }

    fn local_path(&self, name: &str) -> Option<PathBuf> {
        match &self.root {
            Endpoint::Local(path) => Some(path.join(name)),
            Endpoint::Remote { .. } => None,
        }
    }

    fn remote_path(&self, name: &str) -> String {
        format!("{}/{name}", self.root.path().display().to_string().trim_end_matches('/'))
    }

    /// Run a command on the remote side of the root. Must only be called
    /// for remote roots.
    async fn ssh(&self, args: &[&str]) -> io::Result<Output> {
        let target = self
            .root
            .ssh_target()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "ssh on a local destination"))?;
        debug!("ssh {target} {}", args.join(" "));
        Command::new("ssh").arg(target).args(args).output().await
    }

    async fn ssh_checked(&self, what: &str, args: &[&str]) -> Result<Output> {
        let output = self.ssh(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("{what}: {}", stderr.trim()),
            )))
        }
    }

    /// Create the snapshot store root if it does not exist yet.
    pub async fn ensure_root(&self) -> Result<()> {
        match &self.root {
            Endpoint::Local(path) => fs::create_dir_all(path).map_err(|e| Error::DestinationUnreachable {
                reason: format!("cannot create {}: {e}", path.display()),
            }),
            Endpoint::Remote { path, .. } => {
                self.ssh_checked("mkdir -p", &["mkdir", "-p", path])
                    .await
                    .map_err(|e| Error::DestinationUnreachable { reason: e.to_string() })?;
                Ok(())
            }
        }
    }

    /// All published snapshots at the root, ascending by timestamp.
    /// Entries whose names do not parse as snapshot timestamps are
    /// ignored.
    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let names: Vec<String> = match &self.root {
            Endpoint::Local(path) => {
                let entries = fs::read_dir(path).map_err(|e| Error::DestinationUnreachable {
                    reason: format!("cannot list {}: {e}", path.display()),
                })?;
                let mut names = Vec::new();
                for entry in entries {
                    let entry = entry.map_err(|e| Error::DestinationUnreachable {
                        reason: format!("cannot list {}: {e}", path.display()),
                    })?;
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                names
            }
            Endpoint::Remote { path, .. } => {
                let output = self
                    .ssh_checked("ls", &["ls", "-1", "--color=none", path])
                    .await
                    .map_err(|e| Error::DestinationUnreachable { reason: e.to_string() })?;
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(str::to_owned)
                    .collect()
            }
        };

        let mut snapshots: Vec<Snapshot> = names.iter().filter_map(|n| Snapshot::from_name(n)).collect();
        snapshots.sort();
        Ok(snapshots)
    }

    /// Free space and inode numbers for the filesystem holding the root.
    pub async fn statvfs(&self) -> Result<FsStat> {
        match &self.root {
            Endpoint::Local(path) => {
                let stat = nix::sys::statvfs::statvfs(path.as_path()).map_err(|e| {
                    Error::DestinationUnreachable {
                        reason: format!("statvfs {}: {e}", path.display()),
                    }
                })?;
                Ok(FsStat {
                    block_size: stat.block_size() as u64,
                    blocks_total: stat.blocks() as u64,
                    blocks_avail: stat.blocks_available() as u64,
                    inodes_total: stat.files() as u64,
                    inodes_free: stat.files_available() as u64,
                })
            }
            Endpoint::Remote { path, .. } => {
                let output = self
                    .ssh_checked("stat -f", &["stat", "-f", path])
                    .await
                    .map_err(|e| Error::DestinationUnreachable { reason: e.to_string() })?;
                let text = String::from_utf8_lossy(&output.stdout);
                parse_stat_f(&text).ok_or_else(|| Error::DestinationUnreachable {
                    reason: format!("unparseable `stat -f` output for {path}"),
                })
            }
        }
    }

    /// Resolve the `latest` marker.
    pub async fn latest_status(&self) -> Result<LatestStatus> {
        match &self.root {
            Endpoint::Local(root) => {
                let marker = root.join(LATEST_MARKER);
                let meta = match fs::symlink_metadata(&marker) {
                    Ok(meta) => meta,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LatestStatus::Absent),
                    Err(e) => return Err(e.into()),
                };
                if !meta.file_type().is_symlink() {
                    return Ok(LatestStatus::Broken);
                }
                let target = fs::read_link(&marker)?;
                let resolved = if target.is_absolute() {
                    target.clone()
                } else {
                    root.join(&target)
                };
                if !resolved.exists() {
                    return Ok(LatestStatus::Broken);
                }
                match target.file_name() {
                    Some(name) => Ok(LatestStatus::Valid(name.to_string_lossy().into_owned())),
                    None => Ok(LatestStatus::Broken),
                }
            }
            Endpoint::Remote { .. } => {
                let marker = self.remote_path(LATEST_MARKER);
                let is_link = self.ssh(&["test", "-L", &marker]).await?.status.success();
                if !is_link {
                    let exists = self.ssh(&["test", "-e", &marker]).await?.status.success();
                    return Ok(if exists { LatestStatus::Broken } else { LatestStatus::Absent });
                }
                let resolves = self.ssh(&["test", "-e", &marker]).await?.status.success();
                if !resolves {
                    return Ok(LatestStatus::Broken);
                }
                let output = self.ssh_checked("readlink", &["readlink", &marker]).await?;
                let target = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                match target.rsplit('/').next() {
                    Some(name) if !name.is_empty() => Ok(LatestStatus::Valid(name.to_owned())),
                    _ => Ok(LatestStatus::Broken),
                }
            }
        }
    }

    /// Create an empty directory under the root.
    pub async fn mkdir(&self, name: &str) -> Result<()> {
        match self.local_path(name) {
            Some(path) => Ok(fs::create_dir(path)?),
            None => {
                self.ssh_checked("mkdir", &["mkdir", "-p", &self.remote_path(name)]).await?;
                Ok(())
            }
        }
    }

    /// Seed `to` as a hard-link clone of `from`: same directory structure,
    /// every regular file a new link to the same data, no data copied.
    /// `to` must not exist yet.
    pub async fn clone_tree(&self, from: &str, to: &str) -> Result<()> {
        match (self.local_path(from), self.local_path(to)) {
            (Some(src), Some(dst)) => {
                let result = tokio::task::spawn_blocking(move || link_tree(&src, &dst))
                    .await
                    .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
                Ok(result?)
            }
            _ => {
                self.ssh_checked(
                    "cp -al",
                    &["cp", "-al", &self.remote_path(from), &self.remote_path(to)],
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Rename a directory under the root. Single atomic operation on the
    /// local side; `mv -T` remotely.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        match (self.local_path(from), self.local_path(to)) {
            (Some(src), Some(dst)) => Ok(fs::rename(src, dst)?),
            _ => {
                self.ssh_checked(
                    "mv",
                    &["mv", "-T", &self.remote_path(from), &self.remote_path(to)],
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Point the `latest` marker at the named snapshot. The swap is a
    /// symlink created under a temporary name and renamed over the marker,
    /// so a crash leaves either the old or the new valid marker.
    pub async fn point_latest(&self, name: &str) -> Result<()> {
        const TMP: &str = ".latest.tmp";
        match &self.root {
            Endpoint::Local(root) => {
                let tmp = root.join(TMP);
                match fs::remove_file(&tmp) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                std::os::unix::fs::symlink(name, &tmp)?;
                Ok(fs::rename(tmp, root.join(LATEST_MARKER))?)
            }
            Endpoint::Remote { .. } => {
                let tmp = self.remote_path(TMP);
                let marker = self.remote_path(LATEST_MARKER);
                self.ssh_checked(
                    "ln -s && mv -T",
                    &["rm", "-f", &tmp, "&&", "ln", "-s", name, &tmp, "&&", "mv", "-T", &tmp, &marker],
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Remove the `latest` marker if present.
    pub async fn remove_marker(&self) -> Result<()> {
        match &self.root {
            Endpoint::Local(root) => match fs::remove_file(root.join(LATEST_MARKER)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            Endpoint::Remote { .. } => {
                self.ssh_checked("rm -f", &["rm", "-f", &self.remote_path(LATEST_MARKER)]).await?;
                Ok(())
            }
        }
    }

    /// Recursively delete a directory under the root.
    pub async fn remove_tree(&self, name: &str) -> Result<()> {
        match self.local_path(name) {
            Some(path) => {
                let result = tokio::task::spawn_blocking(move || fs::remove_dir_all(&path))
                    .await
                    .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
                Ok(result?)
            }
            None => {
                self.ssh_checked("rm -rf", &["rm", "-rf", &self.remote_path(name)]).await?;
                Ok(())
            }
        }
    }
}

/// Walk `src` and rebuild it at `dst`: directories are recreated with
/// their permissions, regular files become hard links to the same inode,
/// symlinks are recreated pointing at the same target.
fn link_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            io::Error::new(io::ErrorKind::Other, format!("walking {}: {e}", src.display()))
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            fs::set_permissions(&target, entry.metadata()?.permissions())?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::hard_link(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Parse GNU `stat -f` output into [`FsStat`].
fn parse_stat_f(text: &str) -> Option<FsStat> {
    fn number_after<'a>(text: &'a str, key: &str) -> Option<(u64, &'a str)> {
        let rest = &text[text.find(key)? + key.len()..];
        let token = rest.split_whitespace().next()?;
        Some((token.parse().ok()?, rest))
    }

    let (block_size, _) = number_after(text, "Block size:")?;
    let (blocks_total, rest) = number_after(text, "Blocks: Total:")?;
    let (blocks_avail, _) = number_after(rest, "Available:")?;
    let (inodes_total, rest) = number_after(text, "Inodes: Total:")?;
    let (inodes_free, _) = number_after(rest, "Free:")?;
    Some(FsStat {
        block_size,
        blocks_total,
        blocks_avail,
        inodes_total,
        inodes_free,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn local(dir: &TempDir) -> Destination {
        Destination::new(Endpoint::Local(dir.path().to_path_buf()))
    }

    #[tokio::test]
    async fn lists_only_snapshot_shaped_entries() {
        let dir = TempDir::new().unwrap();
        for name in [
            "2026-08-28_01:00:00_GMT",
            "2026-08-30_01:00:00_GMT",
            "2026-08-29_01:00:00_GMT",
        ] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::create_dir(dir.path().join("lost+found")).unwrap();
        fs::write(dir.path().join("notes.txt"), "stray file").unwrap();

        let snapshots = local(&dir).list_snapshots().await.unwrap();

        let names: Vec<&str> = snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "2026-08-28_01:00:00_GMT",
                "2026-08-29_01:00:00_GMT",
                "2026-08-30_01:00:00_GMT",
            ]
        );
    }

    #[tokio::test]
    async fn listing_a_missing_root_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let dest = Destination::new(Endpoint::Local(dir.path().join("nope")));
        let err = dest.list_snapshots().await.unwrap_err();
        assert!(matches!(err, Error::DestinationUnreachable { .. }));
    }

    #[tokio::test]
    async fn latest_marker_lifecycle() {
        let dir = TempDir::new().unwrap();
        let dest = local(&dir);

        assert_eq!(dest.latest_status().await.unwrap(), LatestStatus::Absent);

        fs::create_dir(dir.path().join("2026-08-30_01:00:00_GMT")).unwrap();
        dest.point_latest("2026-08-30_01:00:00_GMT").await.unwrap();
        assert_eq!(
            dest.latest_status().await.unwrap(),
            LatestStatus::Valid("2026-08-30_01:00:00_GMT".into())
        );

        // Deleting the target behind the marker's back breaks it.
        fs::remove_dir(dir.path().join("2026-08-30_01:00:00_GMT")).unwrap();
        assert_eq!(dest.latest_status().await.unwrap(), LatestStatus::Broken);

        dest.remove_marker().await.unwrap();
        assert_eq!(dest.latest_status().await.unwrap(), LatestStatus::Absent);
    }

    #[tokio::test]
    async fn point_latest_replaces_previous_marker() {
        let dir = TempDir::new().unwrap();
        let dest = local(&dir);
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();

        dest.point_latest("a").await.unwrap();
        dest.point_latest("b").await.unwrap();

        assert_eq!(dest.latest_status().await.unwrap(), LatestStatus::Valid("b".into()));
    }

    #[tokio::test]
    async fn clone_tree_shares_inodes() {
        let dir = TempDir::new().unwrap();
        let dest = local(&dir);
        let prev = dir.path().join("prev");
        fs::create_dir_all(prev.join("sub")).unwrap();
        fs::write(prev.join("sub/data.bin"), b"unchanged content").unwrap();
        std::os::unix::fs::symlink("sub/data.bin", prev.join("alias")).unwrap();

        dest.clone_tree("prev", "next").await.unwrap();

        let original = fs::metadata(prev.join("sub/data.bin")).unwrap();
        let linked = fs::metadata(dir.path().join("next/sub/data.bin")).unwrap();
        assert_eq!(original.ino(), linked.ino());
        assert_eq!(linked.nlink(), 2);
        let alias = fs::read_link(dir.path().join("next/alias")).unwrap();
        assert_eq!(alias, PathBuf::from("sub/data.bin"));
    }

    #[tokio::test]
    async fn breaking_a_link_in_the_clone_leaves_the_original() {
        let dir = TempDir::new().unwrap();
        let dest = local(&dir);
        fs::create_dir(dir.path().join("prev")).unwrap();
        fs::write(dir.path().join("prev/file"), b"old").unwrap();

        dest.clone_tree("prev", "next").await.unwrap();

        // Replacing the entry (as rsync does for changed files) must keep
        // the previous snapshot's bytes intact.
        fs::remove_file(dir.path().join("next/file")).unwrap();
        fs::write(dir.path().join("next/file"), b"new").unwrap();
        assert_eq!(fs::read(dir.path().join("prev/file")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn statvfs_reports_nonzero_space() {
        let dir = TempDir::new().unwrap();
        let stat = local(&dir).statvfs().await.unwrap();
        assert!(stat.block_size > 0);
        assert!(stat.bytes_total() > 0);
    }

    #[test]
    fn parses_gnu_stat_f_output() {
        let text = "  File: \"/srv/backups\"\n    ID: fd0c Namelen: 255     Type: ext2/ext3\n\
                    Block size: 4096       Fundamental block size: 4096\n\
                    Blocks: Total: 103180800  Free: 48029990  Available: 42780672\n\
                    Inodes: Total: 26214400   Free: 24891321\n";
        let stat = parse_stat_f(text).unwrap();
        assert_eq!(
            stat,
            FsStat {
                block_size: 4096,
                blocks_total: 103180800,
                blocks_avail: 42780672,
                inodes_total: 26214400,
                inodes_free: 24891321,
            }
        );
    }

    #[test]
    fn stat_f_garbage_is_rejected() {
        assert_eq!(parse_stat_f("no such file or directory"), None);
    }
}
