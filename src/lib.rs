//! # timevault
//!
//! Time Machine style incremental backups: every run publishes a
//! complete-looking snapshot directory in which unchanged files are hard
//! links into the previous snapshot, so only changed or new files consume
//! disk space. A tiered retention policy (keep-all, daily, weekly,
//! monthly) prunes old snapshots as time passes.
//!
//! The actual file transfer is delegated to an external rsync-compatible
//! tool; this crate orchestrates it and reasons about the resulting
//! directory tree. Sources and the destination may be local paths or
//! `user@host:path` descriptors reached over ssh, with at most one remote
//! side per transfer.
//!
//! Configuration is a small YAML file:
//!
//! ```yaml
//! source: /home/alice
//! destination: nas:/volume1/tm
//! exclude:
//!   - "*.cache"
//! smart_remove:
//!   keep_all: 1
//!   keep_one_per_day: 7
//!   keep_one_per_week: 4
//!   keep_one_per_month: 12
//! ```

pub mod cli;
pub mod config;
pub mod dest;
pub mod endpoint;
pub mod error;
pub mod lock;
pub mod logging;
pub mod preflight;
pub mod prune;
pub mod retention;
pub mod run;
pub mod snapshot;
pub mod transfer;

// Re-export commonly used types
pub use config::Config;
pub use dest::Destination;
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use retention::{RetentionPlan, RetentionPolicy};
pub use run::BackupRun;
pub use snapshot::Snapshot;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
