//! Error types for the sync engine.

use thiserror::Error;
use tillsync_core::CoreError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to callers of the engine.
///
/// Per-operation remote failures never appear here; the drain records
/// them on the operation and reports them through events.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The durable store refused a read or write.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// The background worker is already running.
    #[error("background worker already started")]
    AlreadyStarted,

    /// The background worker stopped unexpectedly.
    #[error("background worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    /// Returns true if retrying the call later might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Core(e) => e.is_durability() && !e.is_exhausted(),
            EngineError::AlreadyStarted | EngineError::Worker(_) => false,
        }
    }
}
