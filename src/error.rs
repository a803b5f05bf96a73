//! Error types surfaced by the session manager.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the persistence store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the state file failed.
    #[error("Persisted state I/O failed at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// The state file exists but cannot be decoded.
    #[error("Persisted state at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Encoding the state failed.
    #[error("Failed to encode persisted state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by session manager operations.
///
/// Only persistence failures are surfaced: without a durable record the
/// manager cannot promise crash recovery. Hardware failures are reported
/// through `ApplyResult` or absorbed by the retry timer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The retry worker thread could not be started.
    #[error("Failed to spawn restore retry worker: {0}")]
    Worker(#[source] io::Error),

    /// The final restore already ran; no new session may change the display.
    #[error("Session manager is shutting down")]
    ShuttingDown,
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
