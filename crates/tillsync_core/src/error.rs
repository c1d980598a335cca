//! Error types for the tillsync core.

use crate::types::{OperationId, OperationState};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the durable store and the queue on top of it.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tillsync_storage::StorageError),

    /// I/O error outside the backend (directory, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The store log is damaged before its tail.
    #[error("store log corruption at offset {offset}: {message}")]
    LogCorruption {
        /// Offset of the damaged frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A frame in the middle of the log failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the frame.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory or log is not in a format this build reads.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// No operation with this id is queued.
    #[error("operation not found: {id}")]
    OperationNotFound {
        /// The missing id.
        id: OperationId,
    },

    /// The requested state transition is not allowed.
    #[error("operation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The operation.
        id: OperationId,
        /// Its current state.
        from: OperationState,
        /// The requested state.
        to: OperationState,
    },

    /// Only dead operations can be acknowledged.
    #[error("operation {id} is {state}, not dead")]
    NotDead {
        /// The operation.
        id: OperationId,
        /// Its current state.
        state: OperationState,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid transition error.
    pub fn invalid_transition(id: OperationId, from: OperationState, to: OperationState) -> Self {
        Self::InvalidTransition { id, from, to }
    }

    /// Returns true if the error means a write could not be made durable.
    #[must_use]
    pub fn is_durability(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_) | Self::Codec { .. })
    }

    /// Returns true if the device is out of space or read-only.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_exhausted(),
            _ => false,
        }
    }
}
