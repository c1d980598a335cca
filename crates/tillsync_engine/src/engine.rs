//! The queue drain.

use crate::config::EngineConfig;
use crate::connectivity::Connectivity;
use crate::events::{EventBus, SyncEvent};
use crate::reconcile::{CacheReconciler, ReconcileReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tillsync_core::{
    CacheEffect, OperationId, OperationQueue, QueuedOperation, RecordCache, RemoteDataService,
    RemoteError, RemoteRecord, RemoteRequest, RemoteResult, RetryDisposition, TransientReason,
};
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainStop {
    /// No pending operation is left.
    #[default]
    Drained,
    /// Connectivity was lost.
    Offline,
    /// The head operation failed transiently and waits for its backoff.
    RetryScheduled {
        /// The waiting operation.
        id: OperationId,
        /// Backoff before its next attempt.
        retry_in: Duration,
    },
    /// Another drain was running; it will pick up the request.
    Coalesced,
    /// The store refused to record a transition.
    StorageFailure,
}

/// Outcome of a drain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    /// Operations confirmed by the server.
    pub succeeded: usize,
    /// Operations that went dead.
    pub failed: usize,
    /// One line per failure, transient ones included.
    pub errors: Vec<String>,
    /// Why the drain stopped.
    pub stop: DrainStop,
    /// Reconciliation run after a full drain, if any.
    pub reconciled: Option<ReconcileReport>,
}

impl SyncResult {
    fn coalesced() -> Self {
        Self {
            stop: DrainStop::Coalesced,
            ..Self::default()
        }
    }

    /// Returns true if this call joined a drain already in progress.
    pub fn is_coalesced(&self) -> bool {
        self.stop == DrainStop::Coalesced
    }

    /// Returns the backoff the drain is waiting on, if any.
    pub fn retry_in(&self) -> Option<Duration> {
        match self.stop {
            DrainStop::RetryScheduled { retry_in, .. } => Some(retry_in),
            _ => None,
        }
    }
}

/// Drains the operation queue against the remote service.
///
/// One engine per queue. At most one drain runs at a time; a drain
/// requested while another is running is coalesced into it. Whoever runs
/// a drain, its retry deadline is published through
/// [`SyncEngine::retry_deadline`].
pub struct SyncEngine<R> {
    queue: OperationQueue,
    cache: RecordCache,
    remote: Arc<R>,
    reconciler: CacheReconciler<R>,
    connectivity: watch::Receiver<Connectivity>,
    events: EventBus,
    config: EngineConfig,
    draining: AtomicBool,
    rerun: AtomicBool,
    retry_at: watch::Sender<Option<Instant>>,
}

/// Releases the drain gate, also on panic or cancellation.
struct DrainGate<'a>(&'a AtomicBool);

impl Drop for DrainGate<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Step {
    Continue,
    Stop(DrainStop),
}

impl<R: RemoteDataService> SyncEngine<R> {
    /// Creates an engine.
    pub fn new(
        queue: OperationQueue,
        cache: RecordCache,
        remote: Arc<R>,
        connectivity: watch::Receiver<Connectivity>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        let reconciler = CacheReconciler::new(
            cache.clone(),
            Arc::clone(&remote),
            config.tracked_resources.clone(),
            config.request_timeout,
        );
        Self {
            queue,
            cache,
            remote,
            reconciler,
            connectivity,
            events,
            config,
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            retry_at: watch::Sender::new(None),
        }
    }

    /// Returns a receiver of the instant the next drain is due, set when
    /// a drain stops on a scheduled retry and cleared by any other stop.
    pub fn retry_deadline(&self) -> watch::Receiver<Option<Instant>> {
        self.retry_at.subscribe()
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn is_online(&self) -> bool {
        self.connectivity.borrow().is_online()
    }

    /// Drains the queue in order.
    ///
    /// Stops when the queue is empty, connectivity drops, the head
    /// operation fails transiently, or the store fails. Terminal failures
    /// dead-letter the operation and the drain moves on. After a full
    /// drain the cache is reconciled, and completed operations are purged
    /// when [`EngineConfig::purge_completed`] is set.
    pub async fn drain(&self) -> SyncResult {
        // Flag first: a drain finishing between our failed acquire and
        // this store still sees the request.
        self.rerun.store(true, Ordering::Release);
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already running, coalescing");
            return SyncResult::coalesced();
        }

        let mut result = SyncResult::default();
        loop {
            {
                let _gate = DrainGate(&self.draining);
                while self.rerun.swap(false, Ordering::AcqRel) {
                    result.stop = self.run_pass(&mut result).await;
                    if result.stop != DrainStop::Drained {
                        break;
                    }
                }
            }

            if result.stop != DrainStop::Drained || !self.rerun.load(Ordering::Acquire) {
                break;
            }
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
        }

        // A deadline too far out to represent waits for the next trigger.
        self.retry_at.send_replace(
            result
                .retry_in()
                .and_then(|delay| Instant::now().checked_add(delay)),
        );

        if result.stop == DrainStop::Drained {
            let report = self.reconciler.reconcile().await;
            self.events.emit(SyncEvent::Reconciled(report.clone()));
            result.reconciled = Some(report);

            if self.config.purge_completed {
                if let Err(e) = self.queue.purge_completed() {
                    tracing::warn!(error = %e, "could not purge completed operations");
                }
            }
        }

        self.events.emit(SyncEvent::QueueChanged {
            status: self.queue.status(),
        });
        result
    }

    /// Reconciles the cache now, regardless of the queue.
    pub async fn reconcile(&self) -> ReconcileReport {
        let report = self.reconciler.reconcile().await;
        self.events.emit(SyncEvent::Reconciled(report.clone()));
        report
    }

    async fn run_pass(&self, result: &mut SyncResult) -> DrainStop {
        tracing::info!(pending = self.queue.status().pending, "drain started");

        let stop = match self.recover(result) {
            Some(stop) => stop,
            None => loop {
                if !self.is_online() {
                    break DrainStop::Offline;
                }
                let Some(op) = self.queue.peek_next() else {
                    break DrainStop::Drained;
                };
                if let Step::Stop(stop) = self.process(op, result).await {
                    break stop;
                }
            },
        };

        tracing::info!(
            succeeded = result.succeeded,
            failed = result.failed,
            stop = ?stop,
            "drain finished"
        );
        stop
    }

    /// Returns operations left in flight by an interrupted drain to the
    /// queue.
    fn recover(&self, result: &mut SyncResult) -> Option<DrainStop> {
        let recovered = match self.queue.recover_in_flight() {
            Ok(recovered) => recovered,
            Err(e) => return Some(self.storage_failure(result, e.to_string())),
        };

        for (id, disposition) in recovered {
            if disposition.is_exhausted() {
                if let Some(op) = self.queue.get(&id) {
                    self.dead_lettered(&op, result);
                }
            }
        }
        None
    }

    async fn process(&self, op: QueuedOperation, result: &mut SyncResult) -> Step {
        let op = match self.queue.mark_in_flight(&op.id) {
            Ok(op) => op,
            Err(e) => return Step::Stop(self.storage_failure(result, e.to_string())),
        };

        match self.execute(&op).await {
            Ok(record) => self.succeeded(&op, record, result),
            Err(e) if e.is_transient() => self.failed_transient(&op, &e, result),
            Err(e) => self.failed_terminal(&op, &e, result),
        }
    }

    /// Runs one remote call on its own task, bounded by the request
    /// timeout. A panic in the client becomes a transient failure.
    async fn execute(&self, op: &QueuedOperation) -> RemoteResult<Option<RemoteRecord>> {
        let remote = Arc::clone(&self.remote);
        let request = RemoteRequest::from(op);
        let timeout = self.config.request_timeout;

        let task = tokio::spawn(async move {
            tokio::time::timeout(timeout, remote.execute(request)).await
        });

        match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RemoteError::timeout(format!(
                "no response within {timeout:?}"
            ))),
            Err(e) if e.is_panic() => Err(RemoteError::transient(
                TransientReason::Unexpected,
                "remote client panicked",
            )),
            Err(e) => Err(RemoteError::transient(
                TransientReason::Unexpected,
                e.to_string(),
            )),
        }
    }

    fn succeeded(
        &self,
        op: &QueuedOperation,
        record: Option<RemoteRecord>,
        result: &mut SyncResult,
    ) -> Step {
        if let Err(e) = self.queue.mark_completed(&op.id) {
            // The server has it; replaying later is safe under the same key.
            return Step::Stop(self.storage_failure(result, e.to_string()));
        }

        self.confirm_cache(op, record);
        result.succeeded += 1;
        tracing::debug!(id = %op.id, kind = %op.kind, target = %op.target, "operation synced");
        self.events.emit(SyncEvent::Synced {
            id: op.id,
            kind: op.kind,
            target: op.target.clone(),
        });
        Step::Continue
    }

    /// Moves the cache entry of a confirmed operation towards server truth,
    /// unless a later operation on the same record is still queued.
    fn confirm_cache(&self, op: &QueuedOperation, record: Option<RemoteRecord>) {
        let Some(key) = op.target.record_key() else {
            return;
        };

        let outcome = match (record, op.kind.cache_effect()) {
            (Some(record), _) => self.cache.confirm_if_settled(key.clone(), record.value),
            (None, CacheEffect::Remove) => self.cache.remove_if_settled(&key),
            (None, _) => Ok(false),
        };

        if let Err(e) = outcome {
            tracing::warn!(key = %key, error = %e, "could not update cache after sync");
        }
    }

    fn failed_transient(&self, op: &QueuedOperation, error: &RemoteError, result: &mut SyncResult) -> Step {
        let message = error.to_string();
        result.errors.push(format!("{}: {message}", op.id));

        let disposition = match self.queue.mark_failed_retryable(&op.id, &message) {
            Ok(disposition) => disposition,
            Err(e) => return Step::Stop(self.storage_failure(result, e.to_string())),
        };

        match disposition {
            RetryDisposition::Exhausted { .. } => {
                if let Some(op) = self.queue.get(&op.id) {
                    self.dead_lettered(&op, result);
                }
                Step::Continue
            }
            RetryDisposition::Retry { attempts, remaining } => {
                let retry_in = self.config.retry.delay_for_attempt(attempts);
                tracing::warn!(
                    id = %op.id,
                    attempts,
                    remaining,
                    retry_in = ?retry_in,
                    error = %message,
                    "transient failure, retry scheduled"
                );
                self.events.emit(SyncEvent::RetryScheduled {
                    id: op.id,
                    attempts,
                    retry_in,
                    error: message,
                });
                Step::Stop(DrainStop::RetryScheduled {
                    id: op.id,
                    retry_in,
                })
            }
        }
    }

    fn failed_terminal(&self, op: &QueuedOperation, error: &RemoteError, result: &mut SyncResult) -> Step {
        let message = error.to_string();
        result.errors.push(format!("{}: {message}", op.id));

        match self.queue.mark_dead(&op.id, &message) {
            Ok(op) => {
                self.dead_lettered(&op, result);
                Step::Continue
            }
            Err(e) => Step::Stop(self.storage_failure(result, e.to_string())),
        }
    }

    fn dead_lettered(&self, op: &QueuedOperation, result: &mut SyncResult) {
        result.failed += 1;
        tracing::error!(
            id = %op.id,
            kind = %op.kind,
            target = %op.target,
            attempts = op.attempts,
            error = op.last_error.as_deref().unwrap_or_default(),
            "operation dead-lettered, needs attention"
        );
        self.events.emit(SyncEvent::SyncFailed {
            id: op.id,
            kind: op.kind,
            target: op.target.clone(),
            error: op.last_error.clone().unwrap_or_default(),
            needs_attention: true,
        });
    }

    fn storage_failure(&self, result: &mut SyncResult, message: String) -> DrainStop {
        tracing::error!(error = %message, "store refused a queue transition, stopping drain");
        result.errors.push(message);
        DrainStop::StorageFailure
    }
}
