//! Error types for the sync engine.

use pitwall_core::CoreError;
use pitwall_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The exchange did not finish within the configured timeout.
    #[error("sync request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or error message.
        message: String,
    },

    /// The response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The replica store rejected the merge.
    #[error("store error: {0}")]
    Store(#[from] CoreError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later cycle may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server { status, .. } => *status >= 500,
            SyncError::Protocol(_) | SyncError::Store(_) => false,
        }
    }

    /// Returns true if the failure happened before anything reached the store.
    pub fn is_transport(&self) -> bool {
        !matches!(self, SyncError::Store(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
