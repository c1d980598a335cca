//! The caller-facing facade.

use crate::config::EngineConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::engine::{SyncEngine, SyncResult};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, SyncEvent};
use crate::reconcile::ReconcileReport;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tillsync_core::{
    CacheEffect, CachedRecord, CachedValue, DurableStore, OperationId, OperationKind,
    OperationQueue, QueueStatus, QueuedOperation, RecordCache, RecordKey, RemoteDataService,
    StateFilter, Target,
};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Shared<R> {
    queue: OperationQueue,
    cache: RecordCache,
    engine: SyncEngine<R>,
    monitor: Arc<ConnectivityMonitor>,
    events: EventBus,
    kick: Notify,
}

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Offline-first write path for a point of sale client.
///
/// Writes are queued durably and return at once; a background worker
/// replays them against the server whenever connectivity allows. The
/// record cache serves reads while offline.
///
/// ```ignore
/// let sync = OfflineSync::new(store, remote, monitor, EngineConfig::default());
/// sync.start()?;
/// let id = sync.enqueue_operation(OperationKind::RecordSale, Target::collection("sales"), sale)?;
/// ```
pub struct OfflineSync<R: RemoteDataService> {
    shared: Arc<Shared<R>>,
    worker: Mutex<Option<Worker>>,
}

impl<R: RemoteDataService> OfflineSync<R> {
    /// Wires a facade from its parts. The clock comes with the store.
    pub fn new(
        store: Arc<DurableStore>,
        remote: Arc<R>,
        monitor: Arc<ConnectivityMonitor>,
        config: EngineConfig,
    ) -> Self {
        let queue = OperationQueue::new(Arc::clone(&store));
        let cache = RecordCache::new(store);
        let events = EventBus::new(config.event_capacity);
        let engine = SyncEngine::new(
            queue.clone(),
            cache.clone(),
            remote,
            monitor.subscribe(),
            events.clone(),
            config,
        );

        Self {
            shared: Arc::new(Shared {
                queue,
                cache,
                engine,
                monitor,
                events,
                kick: Notify::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Queues a write intent.
    ///
    /// Returns once the operation is durable. Record creates write the
    /// payload to the cache as an optimistic value, updates merge it into
    /// the cached record and deletes write a tombstone. A running worker
    /// is nudged to attempt it.
    pub fn enqueue_operation(
        &self,
        kind: OperationKind,
        target: Target,
        payload: Value,
    ) -> EngineResult<OperationId> {
        let shared = &self.shared;
        let id = shared.queue.enqueue(kind, target.clone(), payload.clone())?;

        if let Some(key) = target.record_key() {
            let optimistic = match kind.cache_effect() {
                CacheEffect::Upsert => Some(CachedValue::Present(payload)),
                CacheEffect::Merge => Some(CachedValue::Present(merge_patch(
                    shared.cache.value(&key),
                    payload,
                ))),
                CacheEffect::Remove => Some(CachedValue::Tombstone),
                CacheEffect::None => None,
            };
            if let Some(value) = optimistic {
                if let Err(e) = shared.cache.put_local(key.clone(), value) {
                    tracing::warn!(id = %id, key = %key, error = %e, "optimistic cache write failed");
                }
            }
        }

        tracing::debug!(id = %id, kind = %kind, target = %target, "operation queued");
        self.queue_changed();
        shared.kick.notify_one();
        Ok(id)
    }

    /// Returns queue counts.
    pub fn get_queue_status(&self) -> QueueStatus {
        self.shared.queue.status()
    }

    /// Drains the queue now, without waiting for the worker.
    ///
    /// Joins a drain already in progress instead of starting another.
    pub async fn force_sync_now(&self) -> SyncResult {
        self.shared.engine.drain().await
    }

    /// Reconciles the cache with the server now.
    pub async fn reconcile_now(&self) -> ReconcileReport {
        self.shared.engine.reconcile().await
    }

    /// Subscribes to sync events.
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Removes a dead operation after a human has handled it.
    pub fn acknowledge_dead(&self, id: &OperationId) -> EngineResult<QueuedOperation> {
        let op = self.shared.queue.acknowledge_dead(id)?;
        tracing::info!(id = %id, kind = %op.kind, "dead operation acknowledged");
        self.queue_changed();
        Ok(op)
    }

    /// Removes completed operations; returns how many.
    pub fn purge_completed(&self) -> EngineResult<usize> {
        let purged = self.shared.queue.purge_completed()?;
        if purged > 0 {
            self.queue_changed();
        }
        Ok(purged)
    }

    /// Returns a snapshot of queued operations matching `filter`, oldest
    /// first.
    pub fn list_operations(&self, filter: StateFilter) -> Vec<QueuedOperation> {
        self.shared.queue.list(filter).collect()
    }

    /// Returns the cached record for `key`, tombstones included.
    pub fn cached(&self, key: &RecordKey) -> Option<CachedRecord> {
        self.shared.cache.get(key)
    }

    /// Returns the cached records of a resource type.
    pub fn cached_records(&self, resource: &str) -> Vec<CachedRecord> {
        self.shared.cache.records(resource)
    }

    /// Returns the committed connectivity state.
    pub fn connectivity(&self) -> Connectivity {
        self.shared.monitor.current()
    }

    /// Returns the connectivity monitor.
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.shared.monitor
    }

    /// Returns true while the background worker runs.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawns the background worker.
    ///
    /// The worker drains on every transition to online, when a scheduled
    /// retry comes due and after each enqueue. Must be called inside a
    /// tokio runtime.
    pub fn start(&self) -> EngineResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(Arc::clone(&self.shared), stop_rx));
        *worker = Some(Worker { stop, handle });
        tracing::info!("sync worker started");
        Ok(())
    }

    /// Stops the background worker, letting a running drain finish.
    pub async fn shutdown(&self) -> EngineResult<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        let _ = worker.stop.send(true);
        worker
            .handle
            .await
            .map_err(|e| EngineError::Worker(e.to_string()))?;
        tracing::info!("sync worker stopped");
        Ok(())
    }

    fn queue_changed(&self) {
        self.shared.events.emit(SyncEvent::QueueChanged {
            status: self.shared.queue.status(),
        });
    }
}

impl<R: RemoteDataService> Drop for OfflineSync<R> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.handle.abort();
        }
    }
}

/// Merges an update payload into the cached snapshot, key by key. Non
/// object payloads replace the snapshot.
fn merge_patch(current: Option<Value>, patch: Value) -> Value {
    match (current, patch) {
        (Some(Value::Object(mut record)), Value::Object(fields)) => {
            record.extend(fields);
            Value::Object(record)
        }
        (_, patch) => patch,
    }
}

async fn run_worker<R: RemoteDataService>(shared: Arc<Shared<R>>, mut stop: watch::Receiver<bool>) {
    let mut connectivity = shared.monitor.subscribe();
    // Written by every drain, including those run by `force_sync_now`.
    let mut deadline = shared.engine.retry_deadline();

    let online = connectivity.borrow_and_update().is_online();
    if online {
        shared.engine.drain().await;
    }

    loop {
        let retry_at = *deadline.borrow_and_update();

        tokio::select! {
            _ = stop.changed() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connectivity.borrow_and_update();
                shared.events.emit(SyncEvent::ConnectivityChanged { state });
                if state.is_online() {
                    shared.engine.drain().await;
                }
            }
            changed = deadline.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_until(retry_at), if retry_at.is_some() => {
                shared.engine.drain().await;
            }
            // The head operation is backing off; a new enqueue cannot pass it.
            _ = shared.kick.notified(), if retry_at.is_none() => {
                shared.engine.drain().await;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_update_keeps_other_fields() {
        let cached = json!({"name": "Soap", "stock": 12, "price": 150});
        let merged = merge_patch(Some(cached), json!({"price": 175}));
        assert_eq!(merged, json!({"name": "Soap", "stock": 12, "price": 175}));
    }

    #[test]
    fn patch_without_object_to_merge_into_replaces() {
        assert_eq!(merge_patch(None, json!({"price": 175})), json!({"price": 175}));
        assert_eq!(
            merge_patch(Some(json!("tombstoned")), json!({"price": 175})),
            json!({"price": 175})
        );
        assert_eq!(merge_patch(Some(json!({"price": 150})), json!(null)), json!(null));
    }
}
