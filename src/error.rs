//! Error types for timevault operations.

use thiserror::Error;

/// Main error type for timevault operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("destination unreachable: {reason}")]
    DestinationUnreachable { reason: String },

    #[error("not enough free space: {have} MB available, {need} MB required")]
    InsufficientSpace { have: u64, need: u64 },

    #[error("not enough free inodes: {have} available, {need} required")]
    InsufficientInodes { have: u64, need: u64 },

    #[error("transfer of {src} failed: {cause}")]
    Transfer { src: String, cause: String },

    #[error("latest marker integrity error: {0}")]
    LatestMarker(String),

    #[error("cannot prune snapshot {snapshot}: {cause}")]
    Prune { snapshot: String, cause: String },

    #[error("another backup run already holds the lock for this destination")]
    LockHeld,

    #[error("operation cancelled by user")]
    Cancelled,
}

/// Result type alias for timevault operations.
pub type Result<T> = std::result::Result<T, Error>;
