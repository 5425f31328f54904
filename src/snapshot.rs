//! Snapshot naming and ordering.
//!
//! A snapshot is a directory at the destination root named after the UTC
//! time of the run that produced it. The format is fixed-width and
//! zero-padded, so lexical order of names equals chronological order of
//! snapshots. A `latest` symlink at the destination root always points at
//! the most recently published snapshot.

use chrono::NaiveDateTime;

/// Name format of snapshot directories, e.g. `2026-08-30_14:02:51_GMT`.
pub const STAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S_GMT";

/// Name of the movable symlink designating the newest published snapshot.
pub const LATEST_MARKER: &str = "latest";

/// Prefix for staging directories. Starts with a dot so an interrupted
/// run's leftovers never parse as a snapshot name.
pub const STAGING_PREFIX: &str = ".in-progress-";

/// A published snapshot at the destination root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot {
    /// UTC creation time of the run that produced the snapshot.
    pub stamp: NaiveDateTime,
    /// Directory name under the destination root.
    pub name: String,
}

impl Snapshot {
    /// Parse a directory name into a snapshot. Returns `None` for entries
    /// that do not follow the timestamp format (stray files at the
    /// destination root are tolerated, not treated as snapshots).
    pub fn from_name(name: &str) -> Option<Self> {
        let stamp = NaiveDateTime::parse_from_str(name, STAMP_FORMAT).ok()?;
        Some(Self {
            stamp,
            name: name.to_owned(),
        })
    }

    /// The snapshot a run started at `stamp` will publish.
    pub fn at(stamp: NaiveDateTime) -> Self {
        Self {
            name: stamp.format(STAMP_FORMAT).to_string(),
            stamp,
        }
    }

    /// Staging directory name used while this snapshot is being built.
    pub fn staging_name(&self) -> String {
        format!("{STAGING_PREFIX}{}", self.name)
    }
}
