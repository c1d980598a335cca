//! The operation queue: FIFO log of unconfirmed write intents.

use crate::error::{CoreError, CoreResult};
use crate::store::DurableStore;
use crate::types::{
    OperationId, OperationKind, OperationState, QueueStatus, QueuedOperation, RecordKey,
    StateFilter, Target,
};
use serde_json::Value;
use std::sync::Arc;

/// Reason recorded for operations found in flight at drain start.
const INTERRUPTED: &str = "interrupted before the remote outcome was known";

/// Outcome of a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Back to pending; another attempt is allowed.
    Retry {
        /// Attempts made so far.
        attempts: u32,
        /// Attempts left before the ceiling.
        remaining: u32,
    },
    /// The attempt ceiling was reached; the operation is dead.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

impl RetryDisposition {
    /// Returns the attempt count after the failure.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Retry { attempts, .. } | Self::Exhausted { attempts } => *attempts,
        }
    }

    /// Returns true if the operation went dead.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Ordered, durable queue of operations.
///
/// A view over a [`DurableStore`]; cloning is cheap and every clone sees
/// the same queue. Queue order is the store-assigned sequence number.
///
/// # State machine
///
/// ```text
/// pending ──mark_in_flight──▶ in-flight ──mark_completed──▶ completed
///    │                          │  │
///    │                          │  └──mark_failed_retryable──▶ pending (attempts left)
///    │                          │                          └─▶ dead    (ceiling reached)
///    └────────mark_dead─────────┴──────────────────────────▶ dead
/// ```
#[derive(Debug, Clone)]
pub struct OperationQueue {
    store: Arc<DurableStore>,
}

impl OperationQueue {
    /// Creates a queue over a store.
    #[must_use]
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    /// Durably appends a new pending operation.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the operation could not be persisted.
    /// Nothing is queued in that case.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        target: Target,
        payload: Value,
    ) -> CoreResult<OperationId> {
        let max_attempts = self.store.config().default_max_attempts;
        let op = self
            .store
            .insert_operation(kind, target, payload, max_attempts)?;
        tracing::debug!(id = %op.id, kind = %op.kind, target = %op.target, sequence = op.sequence, "enqueued operation");
        Ok(op.id)
    }

    /// Returns one operation.
    #[must_use]
    pub fn get(&self, id: &OperationId) -> Option<QueuedOperation> {
        self.store.operation(id)
    }

    /// Returns the oldest pending operation.
    #[must_use]
    pub fn peek_next(&self) -> Option<QueuedOperation> {
        self.store
            .find_operation(|op| op.state == OperationState::Pending)
    }

    /// Moves a pending operation in flight.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the operation is pending.
    pub fn mark_in_flight(&self, id: &OperationId) -> CoreResult<QueuedOperation> {
        self.store.update_operation(id, |op| {
            require(op, &[OperationState::Pending], OperationState::InFlight)?;
            op.state = OperationState::InFlight;
            Ok(())
        })
    }

    /// Marks an in-flight operation as confirmed by the remote service.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the operation is in flight.
    pub fn mark_completed(&self, id: &OperationId) -> CoreResult<QueuedOperation> {
        self.store.update_operation(id, |op| {
            require(op, &[OperationState::InFlight], OperationState::Completed)?;
            op.state = OperationState::Completed;
            op.attempts += 1;
            Ok(())
        })
    }

    /// Records a transient failure of an in-flight operation.
    ///
    /// Counts the attempt. The operation returns to pending while attempts
    /// remain and goes dead once the ceiling is reached.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the operation is in flight.
    pub fn mark_failed_retryable(
        &self,
        id: &OperationId,
        error: &str,
    ) -> CoreResult<RetryDisposition> {
        let op = self.store.update_operation(id, |op| {
            require(op, &[OperationState::InFlight], OperationState::Pending)?;
            fail_attempt(op, error);
            Ok(())
        })?;
        Ok(disposition(&op))
    }

    /// Moves an operation straight to dead.
    ///
    /// An in-flight operation has its attempt counted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the operation is already terminal.
    pub fn mark_dead(&self, id: &OperationId, error: &str) -> CoreResult<QueuedOperation> {
        let op = self.store.update_operation(id, |op| {
            require(
                op,
                &[OperationState::Pending, OperationState::InFlight],
                OperationState::Dead,
            )?;
            if op.state == OperationState::InFlight {
                op.attempts += 1;
            }
            op.state = OperationState::Dead;
            op.last_error = Some(error.to_string());
            Ok(())
        })?;
        tracing::debug!(id = %op.id, "marked operation dead");
        Ok(op)
    }

    /// Sends every stale in-flight operation through the retryable path.
    ///
    /// Their remote outcome is unknown, so each counts as a failed attempt
    /// and is replayed later under the same idempotency key.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a transition could not be persisted.
    pub fn recover_in_flight(&self) -> CoreResult<Vec<(OperationId, RetryDisposition)>> {
        let recovered = self.store.update_operations(
            |op| op.state == OperationState::InFlight,
            |op| fail_attempt(op, INTERRUPTED),
        )?;

        if !recovered.is_empty() {
            tracing::warn!(count = recovered.len(), "recovered operations left in flight");
        }
        Ok(recovered
            .iter()
            .map(|op| (op.id, disposition(op)))
            .collect())
    }

    /// Returns a snapshot of the queue in order, filtered by state.
    pub fn list(&self, filter: StateFilter) -> impl Iterator<Item = QueuedOperation> {
        self.store
            .operations(|op| filter.matches(op.state))
            .into_iter()
    }

    /// Removes every completed operation; returns how many.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a removal could not be persisted.
    pub fn purge_completed(&self) -> CoreResult<usize> {
        let purged = self
            .store
            .remove_operations(|op| op.state == OperationState::Completed)?;
        if purged > 0 {
            tracing::debug!(purged, "purged completed operations");
        }
        Ok(purged)
    }

    /// Removes a dead operation after a human has handled it.
    ///
    /// # Errors
    ///
    /// Returns `NotDead` for any other state and `OperationNotFound` for
    /// an unknown id.
    pub fn acknowledge_dead(&self, id: &OperationId) -> CoreResult<QueuedOperation> {
        let op = self.store.remove_operation(id, |op| {
            if op.state == OperationState::Dead {
                Ok(())
            } else {
                Err(CoreError::NotDead {
                    id: op.id,
                    state: op.state,
                })
            }
        })?;
        tracing::info!(id = %op.id, kind = %op.kind, "acknowledged dead operation");
        Ok(op)
    }

    /// Returns counts by state.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        self.store.queue_status()
    }

    /// Returns true if a pending or in-flight operation targets `key`.
    #[must_use]
    pub fn has_unsettled_for(&self, key: &RecordKey) -> bool {
        self.store.has_unsettled_for(key)
    }

    /// Returns the number of operations in any state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.queue_status().total
    }

    /// Returns true if the queue holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn require(
    op: &QueuedOperation,
    allowed: &[OperationState],
    to: OperationState,
) -> CoreResult<()> {
    if allowed.contains(&op.state) {
        Ok(())
    } else {
        Err(CoreError::invalid_transition(op.id, op.state, to))
    }
}

fn fail_attempt(op: &mut QueuedOperation, error: &str) {
    op.attempts += 1;
    op.last_error = Some(error.to_string());
    op.state = if op.attempts >= op.max_attempts {
        OperationState::Dead
    } else {
        OperationState::Pending
    };
}

fn disposition(op: &QueuedOperation) -> RetryDisposition {
    if op.state == OperationState::Dead {
        RetryDisposition::Exhausted {
            attempts: op.attempts,
        }
    } else {
        RetryDisposition::Retry {
            attempts: op.attempts,
            remaining: op.remaining_attempts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::types::Timestamp;
    use serde_json::json;
    use tillsync_storage::InMemoryBackend;

    fn queue_with(config: StoreConfig) -> OperationQueue {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1)));
        let store =
            DurableStore::with_backend(Box::new(InMemoryBackend::new()), config, clock).unwrap();
        OperationQueue::new(Arc::new(store))
    }

    fn queue() -> OperationQueue {
        queue_with(StoreConfig::default())
    }

    fn sale(queue: &OperationQueue, n: u32) -> OperationId {
        queue
            .enqueue(
                OperationKind::RecordSale,
                Target::collection("sales"),
                json!({"receipt": n}),
            )
            .unwrap()
    }

    #[test]
    fn enqueue_starts_pending() {
        let queue = queue();
        let id = sale(&queue, 1);

        let op = queue.get(&id).unwrap();
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.attempts, 0);
        assert_eq!(op.max_attempts, 5);
        assert_eq!(op.last_error, None);
        assert_eq!(queue.status().pending, 1);
    }

    #[test]
    fn peek_next_is_oldest_pending() {
        let queue = queue();
        let first = sale(&queue, 1);
        let second = sale(&queue, 2);

        assert_eq!(queue.peek_next().unwrap().id, first);
        queue.mark_in_flight(&first).unwrap();
        assert_eq!(queue.peek_next().unwrap().id, second);
        queue.mark_failed_retryable(&first, "timeout").unwrap();
        assert_eq!(queue.peek_next().unwrap().id, first);
    }

    #[test]
    fn happy_path_transitions() {
        let queue = queue();
        let id = sale(&queue, 1);

        queue.mark_in_flight(&id).unwrap();
        assert_eq!(queue.status().in_flight, 1);

        let op = queue.mark_completed(&id).unwrap();
        assert_eq!(op.state, OperationState::Completed);
        assert_eq!(op.attempts, 1);
        assert!(queue.peek_next().is_none());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let queue = queue();
        let id = sale(&queue, 1);

        assert!(matches!(
            queue.mark_completed(&id),
            Err(CoreError::InvalidTransition { from: OperationState::Pending, .. })
        ));
        assert!(queue.mark_failed_retryable(&id, "x").is_err());

        queue.mark_in_flight(&id).unwrap();
        queue.mark_completed(&id).unwrap();
        assert!(queue.mark_in_flight(&id).is_err());
        assert!(queue.mark_dead(&id, "x").is_err());
    }

    #[test]
    fn retry_ceiling_goes_dead() {
        let queue = queue_with(StoreConfig::new().default_max_attempts(3));
        let id = sale(&queue, 1);

        for expected in 1..3 {
            queue.mark_in_flight(&id).unwrap();
            let disposition = queue.mark_failed_retryable(&id, "503").unwrap();
            assert_eq!(
                disposition,
                RetryDisposition::Retry {
                    attempts: expected,
                    remaining: 3 - expected
                }
            );
        }

        queue.mark_in_flight(&id).unwrap();
        let disposition = queue.mark_failed_retryable(&id, "503").unwrap();
        assert_eq!(disposition, RetryDisposition::Exhausted { attempts: 3 });

        let op = queue.get(&id).unwrap();
        assert_eq!(op.state, OperationState::Dead);
        assert_eq!(op.last_error.as_deref(), Some("503"));
        assert!(queue.peek_next().is_none());
    }

    #[test]
    fn mark_dead_counts_in_flight_attempt() {
        let queue = queue();
        let queued = sale(&queue, 1);
        let sent = sale(&queue, 2);

        assert_eq!(queue.mark_dead(&queued, "invalid").unwrap().attempts, 0);
        queue.mark_in_flight(&sent).unwrap();
        assert_eq!(queue.mark_dead(&sent, "rejected").unwrap().attempts, 1);
        assert_eq!(queue.status().dead, 2);
    }

    #[test]
    fn recover_in_flight_counts_attempt() {
        let queue = queue_with(StoreConfig::new().default_max_attempts(2));
        let a = sale(&queue, 1);
        let b = sale(&queue, 2);
        queue.mark_in_flight(&a).unwrap();
        queue.mark_in_flight(&b).unwrap();
        queue.mark_failed_retryable(&b, "timeout").unwrap();
        queue.mark_in_flight(&b).unwrap();

        let recovered = queue.recover_in_flight().unwrap();
        assert_eq!(
            recovered,
            vec![
                (a, RetryDisposition::Retry { attempts: 1, remaining: 1 }),
                (b, RetryDisposition::Exhausted { attempts: 2 }),
            ]
        );
        assert_eq!(queue.get(&a).unwrap().state, OperationState::Pending);
        assert_eq!(queue.get(&b).unwrap().state, OperationState::Dead);
        assert!(queue.recover_in_flight().unwrap().is_empty());
    }

    #[test]
    fn list_filters() {
        let queue = queue();
        let done = sale(&queue, 1);
        let dead = sale(&queue, 2);
        let waiting = sale(&queue, 3);
        queue.mark_in_flight(&done).unwrap();
        queue.mark_completed(&done).unwrap();
        queue.mark_dead(&dead, "bad").unwrap();

        let ids = |filter| queue.list(filter).map(|op| op.id).collect::<Vec<_>>();
        assert_eq!(ids(StateFilter::All), vec![done, dead, waiting]);
        assert_eq!(ids(StateFilter::Unresolved), vec![dead, waiting]);
        assert_eq!(ids(StateFilter::Only(OperationState::Dead)), vec![dead]);
    }

    #[test]
    fn purge_only_removes_completed() {
        let queue = queue();
        let done = sale(&queue, 1);
        let dead = sale(&queue, 2);
        sale(&queue, 3);
        queue.mark_in_flight(&done).unwrap();
        queue.mark_completed(&done).unwrap();
        queue.mark_dead(&dead, "bad").unwrap();

        assert_eq!(queue.purge_completed().unwrap(), 1);
        assert_eq!(queue.purge_completed().unwrap(), 0);
        let status = queue.status();
        assert_eq!((status.pending, status.dead, status.completed, status.total), (1, 1, 0, 2));
    }

    #[test]
    fn acknowledge_requires_dead() {
        let queue = queue();
        let pending = sale(&queue, 1);
        let dead = sale(&queue, 2);
        queue.mark_dead(&dead, "bad").unwrap();

        assert!(matches!(
            queue.acknowledge_dead(&pending),
            Err(CoreError::NotDead { state: OperationState::Pending, .. })
        ));
        assert_eq!(queue.acknowledge_dead(&dead).unwrap().id, dead);
        assert!(matches!(
            queue.acknowledge_dead(&dead),
            Err(CoreError::OperationNotFound { .. })
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn unsettled_tracking() {
        let queue = queue();
        let key = RecordKey::new("products", "P-1");
        let id = queue
            .enqueue(
                OperationKind::UpdateProduct,
                Target::record("products", "P-1"),
                json!({"price": 3}),
            )
            .unwrap();

        assert!(queue.has_unsettled_for(&key));
        queue.mark_in_flight(&id).unwrap();
        assert!(queue.has_unsettled_for(&key));
        queue.mark_completed(&id).unwrap();
        assert!(!queue.has_unsettled_for(&key));
    }

    proptest::proptest! {
        /// Whatever mix of outcomes, completions happen in enqueue order.
        #[test]
        fn completions_follow_enqueue_order(
            outcomes in proptest::collection::vec(proptest::bool::ANY, 1..40)
        ) {
            let queue = queue_with(StoreConfig::new().default_max_attempts(1_000));
            let enqueued: Vec<OperationId> = (0..8).map(|n| sale(&queue, n)).collect();

            let mut completed = Vec::new();
            for succeed in outcomes {
                let Some(next) = queue.peek_next() else { break };
                queue.mark_in_flight(&next.id).unwrap();
                if succeed {
                    queue.mark_completed(&next.id).unwrap();
                    completed.push(next.id);
                } else {
                    queue.mark_failed_retryable(&next.id, "flaky").unwrap();
                }
            }

            proptest::prop_assert_eq!(&completed[..], &enqueued[..completed.len()]);
        }
    }
}
