//! Per-destination run lock.
//!
//! Concurrent runs against the same destination are unsafe: a second
//! run's seeding step could observe a snapshot mid-publication. The lock
//! is an flock'd file under /tmp keyed by the destination string, so one
//! host runs at most one backup per destination at a time. It is
//! advisory only across hosts.

use crate::error::{Error, Result};
use nix::fcntl::{Flock, FlockArg};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tracing::debug;

/// Held for the duration of one run; released (and the lock file
/// removed) on drop.
pub struct RunLock {
    _flock: Flock<File>,
    path: PathBuf,
}

fn lock_path(destination: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    destination.hash(&mut hasher);
    std::env::temp_dir().join(format!("timevault-{:016x}.lock", hasher.finish()))
}

impl RunLock {
    /// Take the exclusive lock for `destination`, without blocking.
    pub fn acquire(destination: &str) -> Result<Self> {
        let path = lock_path(destination);
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => {
                debug!("acquired run lock {}", path.display());
                Ok(Self { _flock: flock, path })
            }
            Err((_file, _errno)) => Err(Error::LockHeld),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("could not remove lock file {}: {e}", self.path.display());
        }
    }
}
