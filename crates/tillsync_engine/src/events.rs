//! Outcome notifications for UI code.

use crate::connectivity::Connectivity;
use crate::reconcile::ReconcileReport;
use std::time::Duration;
use tillsync_core::{OperationId, OperationKind, QueueStatus, Target};
use tokio::sync::broadcast;

/// Something the UI may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The queue changed locally (enqueue, acknowledge, purge).
    ///
    /// Distinct from [`SyncEvent::Synced`]: a queued operation is not yet
    /// confirmed by the server.
    QueueChanged {
        /// Counts after the change.
        status: QueueStatus,
    },
    /// The server confirmed an operation.
    Synced {
        /// The confirmed operation.
        id: OperationId,
        /// Its kind.
        kind: OperationKind,
        /// Its target.
        target: Target,
    },
    /// An operation went dead.
    SyncFailed {
        /// The failed operation.
        id: OperationId,
        /// Its kind.
        kind: OperationKind,
        /// Its target.
        target: Target,
        /// Last error.
        error: String,
        /// True when a human has to look at it.
        needs_attention: bool,
    },
    /// A transient failure; the operation will be retried.
    RetryScheduled {
        /// The operation that failed.
        id: OperationId,
        /// Attempts made so far.
        attempts: u32,
        /// Wait before the next attempt.
        retry_in: Duration,
        /// Last error.
        error: String,
    },
    /// The committed connectivity state changed.
    ConnectivityChanged {
        /// The new state.
        state: Connectivity,
    },
    /// A reconciliation pass finished.
    Reconciled(ReconcileReport),
}

/// Broadcast fan-out of [`SyncEvent`]s.
///
/// Emitting never blocks and never fails; events sent with no subscriber
/// are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns a receiver for every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Sends an event to all current subscribers.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(SyncEvent::QueueChanged {
            status: QueueStatus::default(),
        });
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn subscribers_see_later_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let event = SyncEvent::ConnectivityChanged {
            state: Connectivity::Online,
        };

        bus.emit(event.clone());
        assert_eq!(rx.try_recv().unwrap(), event);
        assert!(rx.try_recv().is_err());
    }
}
