//! Error types for the session layer.

use crate::network::NetworkError;
use thiserror::Error;
use trellis_core::ReplicationError;

/// Error type for session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Replication(ReplicationError::from(err))
    }
}

impl SessionError {
    /// The replication error inside, if any.
    pub fn replication(&self) -> Option<&ReplicationError> {
        match self {
            SessionError::Replication(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
