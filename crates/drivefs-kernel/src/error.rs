//! Error types for drivefs.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by drives, the store, and the façade.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("unknown drive: {0}")]
    UnknownDrive(String),

    #[error("invalid drive name: {0:?}")]
    InvalidDriveName(String),

    #[error("drive name is reserved: {0}")]
    ReservedDrive(String),

    #[error("drive is read-only")]
    ReadOnly,

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("path escapes drive root: {0}")]
    PathEscapesRoot(String),

    #[error("lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type for drivefs operations.
pub type FsResult<T> = Result<T, FsError>;
