//! Boundary to the remote system of record.
//!
//! The engine only ever talks to the server through
//! [`RemoteDataService`]. Implementations translate HTTP (or anything
//! else) into the two outcomes the engine understands: transient
//! failures, which are retried, and terminal ones, which are not.

use crate::types::{OperationKind, QueuedOperation, Target};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// One operation replayed against the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// Business operation type.
    pub kind: OperationKind,
    /// Resource the operation applies to.
    pub target: Target,
    /// Payload captured at enqueue time.
    pub payload: Value,
    /// The operation id; identical on every retry.
    pub idempotency_key: String,
}

impl From<&QueuedOperation> for RemoteRequest {
    fn from(op: &QueuedOperation) -> Self {
        Self {
            kind: op.kind,
            target: op.target.clone(),
            payload: op.payload.clone(),
            idempotency_key: op.id.to_string(),
        }
    }
}

/// A record as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record id within its resource.
    pub id: String,
    /// Full record snapshot.
    pub value: Value,
}

impl RemoteRecord {
    /// Creates a remote record.
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// Why a retry might succeed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientReason {
    /// The call did not finish within the request timeout.
    Timeout,
    /// The server answered 5xx or is in maintenance.
    Unavailable,
    /// The server asked the client to slow down.
    RateLimited,
    /// The connection failed or dropped.
    Network,
    /// Anything unclassified, including a panicking client.
    Unexpected,
}

/// Why retrying cannot succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalReason {
    /// The server rejected the payload.
    Validation,
    /// The operation conflicts with server state.
    Conflict,
    /// The target no longer exists.
    Gone,
    /// The session may not perform the operation.
    Unauthorized,
}

impl fmt::Display for TransientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate limited",
            Self::Network => "network",
            Self::Unexpected => "unexpected",
        })
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Gone => "gone",
            Self::Unauthorized => "unauthorized",
        })
    }
}

/// Failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Retrying might succeed later.
    #[error("transient remote failure ({reason}): {message}")]
    Transient {
        /// Classification.
        reason: TransientReason,
        /// Server or client message.
        message: String,
    },
    /// Retrying cannot succeed.
    #[error("terminal remote failure ({reason}): {message}")]
    Terminal {
        /// Classification.
        reason: TerminalReason,
        /// Server or client message.
        message: String,
    },
}

impl RemoteError {
    /// Creates a transient error.
    pub fn transient(reason: TransientReason, message: impl Into<String>) -> Self {
        Self::Transient {
            reason,
            message: message.into(),
        }
    }

    /// Creates a terminal error.
    pub fn terminal(reason: TerminalReason, message: impl Into<String>) -> Self {
        Self::Terminal {
            reason,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transient(TransientReason::Timeout, message)
    }

    /// Returns true if retrying might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// The remote system of record.
///
/// Implementations must honour `idempotency_key`: executing the same key
/// twice has the effect of executing it once. The engine bounds every
/// call with its own timeout.
pub trait RemoteDataService: Send + Sync + 'static {
    /// Executes one operation. A returned record is the server's view of
    /// the target after the operation.
    fn execute(
        &self,
        request: RemoteRequest,
    ) -> impl Future<Output = RemoteResult<Option<RemoteRecord>>> + Send;

    /// Fetches every record of a resource type.
    fn fetch_all(
        &self,
        resource: &str,
    ) -> impl Future<Output = RemoteResult<Vec<RemoteRecord>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OperationId, OperationState, Timestamp};
    use serde_json::json;

    #[test]
    fn request_carries_operation_id() {
        let op = QueuedOperation {
            id: OperationId::new(),
            sequence: 1,
            kind: OperationKind::Restock,
            target: Target::record("products", "P-1"),
            payload: json!({"quantity": 5}),
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
            attempts: 2,
            max_attempts: 5,
            state: OperationState::InFlight,
            last_error: None,
        };

        let request = RemoteRequest::from(&op);
        assert_eq!(request.idempotency_key, op.id.to_string());
        assert_eq!(request.target, op.target);
        assert_eq!(request.payload, json!({"quantity": 5}));
    }

    #[test]
    fn classification() {
        assert!(RemoteError::timeout("5s").is_transient());
        assert!(!RemoteError::terminal(TerminalReason::Validation, "qty < 0").is_transient());
        assert_eq!(
            RemoteError::transient(TransientReason::RateLimited, "429").to_string(),
            "transient remote failure (rate limited): 429"
        );
    }
}
