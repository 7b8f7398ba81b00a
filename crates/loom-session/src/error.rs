//! Error types for session lifecycle and compute provisioning.

use thiserror::Error;

/// Errors from the container-orchestration API.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// 404. Teardown and ensure treat this as already satisfied.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 409 on create: someone else created it first.
    #[error("Resource already exists: {0}")]
    Conflict(String),

    /// Any other non-success response. Retry policy belongs to the caller.
    #[error("Orchestration API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The manifest could not be rendered (e.g. the workspace id is not a
    /// valid resource name).
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ComputeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ComputeError::NotFound(_)) || matches!(self, ComputeError::Api { status: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ComputeError::Conflict(_)) || matches!(self, ComputeError::Api { status: 409, .. })
    }
}

pub type ComputeResult<T> = std::result::Result<T, ComputeError>;

/// Errors from opening or running a workspace session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Files(#[from] loom_files::FileSyncError),

    #[error(transparent)]
    Terminal(#[from] loom_terminal::TerminalError),

    #[error("Invalid workspace id: {0}")]
    InvalidWorkspace(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
