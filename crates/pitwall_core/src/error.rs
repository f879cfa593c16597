//! Error types for Pitwall core.

use pitwall_protocol::{PitlaneConfigId, TableName};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store, queue and merge operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad caller input; nothing was written.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// A referenced row does not exist or is deleted.
    #[error("{message}")]
    NotFound {
        /// Table that was searched.
        table: TableName,
        /// Human readable description.
        message: String,
    },

    /// The request collides with existing domain state.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the collision.
        message: String,
    },

    /// A queue slot was still occupied after the resolver released it.
    #[error("slot ({config}, line {line}, position {position}) still occupied after release")]
    SlotIntegrity {
        /// Configuration of the slot.
        config: PitlaneConfigId,
        /// Line of the slot.
        line: u32,
        /// Position of the slot.
        position: u32,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Journal frame could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// An intact journal frame holds operations that cannot be decoded.
    #[error("journal corruption in frame {frame}: {message}")]
    JournalCorruption {
        /// Index of the bad frame.
        frame: usize,
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory is unusable.
    #[error("invalid store: {message}")]
    InvalidStore {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error for `table`.
    pub fn not_found(table: TableName, message: impl Into<String>) -> Self {
        Self::NotFound {
            table,
            message: message.into(),
        }
    }

    /// Creates a domain conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid store error.
    pub fn invalid_store(message: impl Into<String>) -> Self {
        Self::InvalidStore {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the caller's input or by domain
    /// state the caller must correct. These are never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CoreError::Validation { .. } | CoreError::NotFound { .. } | CoreError::Conflict { .. }
        )
    }
}
