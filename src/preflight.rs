//! Free-space preflight checks.
//!
//! A run never starts a transfer that is known in advance to be unable to
//! complete: the destination filesystem must clear configurable free
//! space and free inode thresholds first. A failed check aborts the run
//! before anything is written.

use crate::dest::FsStat;
use crate::error::{Error, Result};
use serde::Deserialize;
use tracing::{debug, info};

const ONE_K: f64 = 1024.0;
const ONE_M: f64 = 1048576.0;
const ONE_G: f64 = 1073741824.0;
const ONE_T: f64 = 1099511627776.0;

/// Minimum resources the destination filesystem must have before a
/// transfer is allowed to start.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreeSpaceRequirement {
    /// Minimum free space in MB.
    pub min_space: u64,
    /// Minimum free inodes.
    pub min_inodes: u64,
}

impl Default for FreeSpaceRequirement {
    fn default() -> Self {
        Self {
            min_space: 1024,
            min_inodes: 100_000,
        }
    }
}

/// Check the destination stats against the requirement.
pub fn check(stat: &FsStat, requirement: &FreeSpaceRequirement) -> Result<()> {
    // btrfs reports zero total inodes; the inode check is meaningless there.
    if stat.inodes_total == 0 {
        debug!("filesystem reports no inode totals, skipping inode check");
    } else if stat.inodes_free < requirement.min_inodes {
        return Err(Error::InsufficientInodes {
            have: stat.inodes_free,
            need: requirement.min_inodes,
        });
    }

    let free_mb = stat.bytes_avail() / (ONE_M as u64);
    if free_mb < requirement.min_space {
        return Err(Error::InsufficientSpace {
            have: free_mb,
            need: requirement.min_space,
        });
    }
    Ok(())
}

/// Log a humanized one-glance summary of the destination filesystem.
pub fn log_stat(label: &str, stat: &FsStat) {
    info!("{label}:");
    let free = stat.bytes_avail();
    let total = stat.bytes_total();
    if total > 0 {
        let used = (total - free) as f64 * 100.0 / total as f64;
        info!("    free space: {}, {used:.1}% used", humanize_bytes(free));
    }
    if stat.inodes_total > 0 {
        let used = (stat.inodes_total - stat.inodes_free) as f64 * 100.0 / stat.inodes_total as f64;
        info!("    free inodes: {}, {used:.1}% used", humanize_count(stat.inodes_free));
    }
}

fn humanize_bytes(n: u64) -> String {
    let n = n as f64;
    if n >= ONE_T {
        format!("{:.2} TB", n / ONE_T)
    } else if n >= ONE_G {
        format!("{:.2} GB", n / ONE_G)
    } else if n >= ONE_M {
        format!("{:.0} MB", n / ONE_M)
    } else if n >= ONE_K {
        format!("{:.0} KB", n / ONE_K)
    } else {
        format!("{n:.0} Bytes")
    }
}

fn humanize_count(n: u64) -> String {
    let n = n as f64;
    if n >= ONE_T {
        format!("{:.0} T", n / ONE_T)
    } else if n >= ONE_G {
        format!("{:.0} G", n / ONE_G)
    } else if n >= ONE_M {
        format!("{:.0} M", n / ONE_M)
    } else if n >= ONE_K {
        format!("{:.0} K", n / ONE_K)
    } else {
        format!("{n:.0}")
    }
}
