//! Error types for the sync engine

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `anyhow::Error`
pub type Result<T> = anyhow::Result<T>;

/// Configuration-level failures.
///
/// These are the only errors surfaced to the user before any diffing
/// starts; everything downstream (a vanished file, a failed copy) is
/// logged and folded into the batch report instead.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No sync folder has been configured and none was supplied.
    #[error("no sync folder configured")]
    NotConfigured,

    /// A configured root path does not exist.
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// A configured root path exists but is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// An include/ignore pattern is empty or whitespace.
    #[error("{0} pattern cannot be empty")]
    EmptyPattern(&'static str),

    /// The poll interval must be at least one second.
    #[error("sync_interval must be at least 1 second")]
    InvalidInterval,
}
