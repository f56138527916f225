//! Log error types.

use thiserror::Error;

/// Errors raised by session, log and frame operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// The session root has no non-archived session directory.
    #[error("no active session")]
    NoSession,
    /// A session directory with this id already exists.
    #[error("session {0} already exists")]
    SessionExists(String),
    /// A frame id contained characters outside `[A-Za-z0-9_-]`.
    #[error("invalid frame id: {0:?}")]
    InvalidFrameId(String),
    /// No frame file exists for this id.
    #[error("frame {0} not found")]
    FrameNotFound(String),
    /// Filesystem error.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("log JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The change watch could not be installed.
    #[error("log watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl From<tokio::task::JoinError> for LogError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Io(std::io::Error::other(err))
    }
}

/// Result type for log operations.
pub type Result<T> = std::result::Result<T, LogError>;
