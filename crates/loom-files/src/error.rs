use thiserror::Error;

use crate::path::PathError;
use crate::store::StoreError;
use crate::watcher::WatcherError;

#[derive(Debug, Error)]
pub enum FileSyncError {
    /// Illegal path or name. Surfaced to the caller, never retried.
    #[error("Invalid path: {0}")]
    Validation(#[from] PathError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),
}

pub type Result<T> = std::result::Result<T, FileSyncError>;
