//! Error types for the Weft conflict resolution engine.

use std::path::PathBuf;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Archive unreadable: {path:?}: {reason}")]
    ArchiveUnreadable { path: PathBuf, reason: String },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Engine-level errors
///
/// Per-path failures never surface here; they resolve to a `Failed` status in
/// the run summary. `EngineError` covers unusable engine-level state only.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cache root unusable: {path:?}: {reason}")]
    CacheRootUnusable { path: PathBuf, reason: String },

    #[error("Overlay root unusable: {path:?}: {reason}")]
    OverlayRootUnusable { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Engine I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
