//! The durable store: one log, replayed into memory on open.
//!
//! The store owns every persisted byte. Queue and cache are views that
//! mutate it through the crate-private methods below. Every mutation
//! appends a frame before the in-memory state changes, so a failed write
//! leaves both the log and memory as they were.

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::log::{Frame, LogScan, StoreLog};
use crate::types::{
    CachedRecord, OperationId, OperationKind, OperationState, QueueStatus, QueuedOperation,
    RecordKey, Target,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tillsync_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// What happened while the log was replayed on open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryInfo {
    /// Bytes of torn tail cut off the log.
    pub torn_bytes: u64,
    /// Operations live after replay.
    pub operations: usize,
    /// Operations found in flight, whose outcome is unknown.
    pub in_flight: usize,
}

/// Store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Cached records, tombstones included.
    pub records: usize,
    /// Frames in the log.
    pub frames: usize,
    /// Frames no longer needed to rebuild live state.
    pub superseded_frames: usize,
    /// Current log length in bytes.
    pub log_bytes: u64,
}

struct StoreInner {
    log: StoreLog,
    /// Live operations keyed by sequence, which is queue order.
    operations: BTreeMap<u64, QueuedOperation>,
    by_id: HashMap<OperationId, u64>,
    records: BTreeMap<RecordKey, CachedRecord>,
    next_sequence: u64,
    frames: usize,
}

impl StoreInner {
    fn from_scan(log: StoreLog, scan: &LogScan) -> Self {
        let mut inner = Self {
            log,
            operations: BTreeMap::new(),
            by_id: HashMap::new(),
            records: BTreeMap::new(),
            next_sequence: 1,
            frames: scan.frames.len(),
        };

        for (_, frame) in &scan.frames {
            inner.apply(frame.clone());
        }
        inner.next_sequence = inner
            .operations
            .keys()
            .next_back()
            .map_or(1, |last| last + 1);
        inner
    }

    fn apply(&mut self, frame: Frame) {
        match frame {
            Frame::PutOperation(op) => {
                if let Some(old) = self.by_id.insert(op.id, op.sequence) {
                    if old != op.sequence {
                        self.operations.remove(&old);
                    }
                }
                self.operations.insert(op.sequence, op);
            }
            Frame::RemoveOperation { id } => {
                if let Some(sequence) = self.by_id.remove(&id) {
                    self.operations.remove(&sequence);
                }
            }
            Frame::PutRecord(record) => {
                self.records.insert(record.key.clone(), record);
            }
            Frame::RemoveRecord { key } => {
                self.records.remove(&key);
            }
        }
    }

    /// Persists then applies.
    fn commit(&mut self, frame: Frame) -> CoreResult<()> {
        self.log.append(&frame)?;
        self.frames += 1;
        self.apply(frame);
        Ok(())
    }

    fn get(&self, id: &OperationId) -> Option<&QueuedOperation> {
        self.by_id
            .get(id)
            .and_then(|sequence| self.operations.get(sequence))
    }

    fn live(&self) -> usize {
        self.operations.len() + self.records.len()
    }

    fn superseded(&self) -> usize {
        self.frames.saturating_sub(self.live())
    }

    fn has_unsettled_for(&self, key: &RecordKey) -> bool {
        self.operations
            .values()
            .any(|op| op.is_unsettled() && op.touches(key))
    }

    fn compact(&mut self) -> CoreResult<()> {
        let snapshot: Vec<Frame> = self
            .operations
            .values()
            .cloned()
            .map(Frame::PutOperation)
            .chain(self.records.values().cloned().map(Frame::PutRecord))
            .collect();

        self.log.rewrite(&snapshot)?;
        let dropped = self.superseded();
        self.frames = snapshot.len();
        tracing::debug!(frames = self.frames, dropped, "compacted store log");
        Ok(())
    }
}

/// Persistent home of the operation queue and the record cache.
///
/// # Thread Safety
///
/// All access is serialized by one mutex. Callers share the store through
/// an `Arc`.
pub struct DurableStore {
    inner: Mutex<StoreInner>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    recovery: RecoveryInfo,
    _dir: Option<StoreDir>,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("config", &self.config)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl DurableStore {
    /// Opens or creates a store in a directory.
    ///
    /// Takes the directory lock for the lifetime of the store and replays
    /// `store.log`, cutting off a torn tail.
    ///
    /// # Errors
    ///
    /// Returns `StoreLocked` if another process has the directory open,
    /// a corruption error if the log is damaged before its tail, or an
    /// I/O error.
    pub fn open(path: &Path, config: StoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.log_path())?;
        Self::build(Box::new(backend), config, clock, Some(dir))
    }

    /// Opens a store over any backend.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the log is damaged before its tail.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        Self::build(backend, config, clock, None)
    }

    /// Creates an empty store that lives only in memory.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let inner = StoreInner::from_scan(
            StoreLog::open_empty(Box::new(InMemoryBackend::new()), StoreConfig::default().sync_mode),
            &LogScan::default(),
        );
        Self {
            inner: Mutex::new(inner),
            config: StoreConfig::default(),
            clock,
            recovery: RecoveryInfo::default(),
            _dir: None,
        }
    }

    fn build(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
        dir: Option<StoreDir>,
    ) -> CoreResult<Self> {
        let (log, scan) = StoreLog::open(backend, config.sync_mode)?;
        let inner = StoreInner::from_scan(log, &scan);

        let recovery = RecoveryInfo {
            torn_bytes: scan.torn_bytes(),
            operations: inner.operations.len(),
            in_flight: inner
                .operations
                .values()
                .filter(|op| op.state == OperationState::InFlight)
                .count(),
        };
        tracing::info!(
            operations = recovery.operations,
            records = inner.records.len(),
            in_flight = recovery.in_flight,
            torn_bytes = recovery.torn_bytes,
            "opened durable store"
        );

        Ok(Self {
            inner: Mutex::new(inner),
            config,
            clock,
            recovery,
            _dir: dir,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the injected clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns what replay found when the store was opened.
    #[must_use]
    pub fn recovery(&self) -> RecoveryInfo {
        self.recovery
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            records: inner.records.len(),
            frames: inner.frames,
            superseded_frames: inner.superseded(),
            log_bytes: inner.log.size().unwrap_or(0),
        }
    }

    /// Counts operations by state without copying them.
    #[must_use]
    pub fn queue_status(&self) -> QueueStatus {
        let inner = self.inner.lock();
        let mut status = QueueStatus {
            total: inner.operations.len(),
            ..QueueStatus::default()
        };
        for op in inner.operations.values() {
            match op.state {
                OperationState::Pending => status.pending += 1,
                OperationState::InFlight => status.in_flight += 1,
                OperationState::Completed => status.completed += 1,
                OperationState::Dead => status.dead += 1,
            }
        }
        status
    }

    /// Returns one operation by id.
    #[must_use]
    pub fn operation(&self, id: &OperationId) -> Option<QueuedOperation> {
        self.inner.lock().get(id).cloned()
    }

    /// Returns the operations matching `predicate`, in queue order. Only
    /// matches are copied.
    #[must_use]
    pub fn operations<P>(&self, predicate: P) -> Vec<QueuedOperation>
    where
        P: Fn(&QueuedOperation) -> bool,
    {
        self.inner
            .lock()
            .operations
            .values()
            .filter(|op| predicate(op))
            .cloned()
            .collect()
    }

    /// Returns the first operation in queue order matching `predicate`.
    #[must_use]
    pub fn find_operation<P>(&self, predicate: P) -> Option<QueuedOperation>
    where
        P: Fn(&QueuedOperation) -> bool,
    {
        self.inner
            .lock()
            .operations
            .values()
            .find(|op| predicate(op))
            .cloned()
    }

    /// Returns one cached record.
    #[must_use]
    pub fn record(&self, key: &RecordKey) -> Option<CachedRecord> {
        self.inner.lock().records.get(key).cloned()
    }

    /// Returns cached records ordered by key, optionally for one resource.
    #[must_use]
    pub fn records(&self, resource: Option<&str>) -> Vec<CachedRecord> {
        self.inner
            .lock()
            .records
            .values()
            .filter(|r| resource.map_or(true, |res| r.key.resource == res))
            .cloned()
            .collect()
    }

    /// Returns true if a pending or in-flight operation targets `key`.
    #[must_use]
    pub fn has_unsettled_for(&self, key: &RecordKey) -> bool {
        self.inner.lock().has_unsettled_for(key)
    }

    /// Rewrites the log as a snapshot of live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be made durable; the old
    /// log stays in place.
    pub fn compact(&self) -> CoreResult<()> {
        self.inner.lock().compact()
    }

    /// Appends a new pending operation at the back of the queue.
    pub(crate) fn insert_operation(
        &self,
        kind: OperationKind,
        target: Target,
        payload: Value,
        max_attempts: u32,
    ) -> CoreResult<QueuedOperation> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let op = QueuedOperation {
            id: OperationId::new(),
            sequence: inner.next_sequence,
            kind,
            target,
            payload,
            created_at: now,
            updated_at: now,
            attempts: 0,
            max_attempts,
            state: OperationState::Pending,
            last_error: None,
        };

        inner.commit(Frame::PutOperation(op.clone()))?;
        inner.next_sequence += 1;
        Ok(op)
    }

    /// Applies `change` to a copy of one operation and persists the result.
    ///
    /// `change` may refuse by returning an error, in which case nothing is
    /// written.
    pub(crate) fn update_operation<F>(&self, id: &OperationId, change: F) -> CoreResult<QueuedOperation>
    where
        F: FnOnce(&mut QueuedOperation) -> CoreResult<()>,
    {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let mut op = inner
            .get(id)
            .cloned()
            .ok_or(CoreError::OperationNotFound { id: *id })?;
        change(&mut op)?;
        op.updated_at = now;

        inner.commit(Frame::PutOperation(op.clone()))?;
        self.maybe_compact(&mut inner);
        Ok(op)
    }

    /// Applies `change` to every operation matching `select`, in queue order.
    pub(crate) fn update_operations<S, F>(&self, select: S, mut change: F) -> CoreResult<Vec<QueuedOperation>>
    where
        S: Fn(&QueuedOperation) -> bool,
        F: FnMut(&mut QueuedOperation),
    {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let selected: Vec<QueuedOperation> = inner
            .operations
            .values()
            .filter(|op| select(op))
            .cloned()
            .collect();

        let mut updated = Vec::with_capacity(selected.len());
        for mut op in selected {
            change(&mut op);
            op.updated_at = now;
            inner.commit(Frame::PutOperation(op.clone()))?;
            updated.push(op);
        }

        self.maybe_compact(&mut inner);
        Ok(updated)
    }

    /// Removes one operation after `check` approves it.
    pub(crate) fn remove_operation<C>(&self, id: &OperationId, check: C) -> CoreResult<QueuedOperation>
    where
        C: FnOnce(&QueuedOperation) -> CoreResult<()>,
    {
        let mut inner = self.inner.lock();

        let op = inner
            .get(id)
            .cloned()
            .ok_or(CoreError::OperationNotFound { id: *id })?;
        check(&op)?;

        inner.commit(Frame::RemoveOperation { id: *id })?;
        self.maybe_compact(&mut inner);
        Ok(op)
    }

    /// Removes every operation matching `select`.
    pub(crate) fn remove_operations<S>(&self, select: S) -> CoreResult<usize>
    where
        S: Fn(&QueuedOperation) -> bool,
    {
        let mut inner = self.inner.lock();

        let ids: Vec<OperationId> = inner
            .operations
            .values()
            .filter(|op| select(op))
            .map(|op| op.id)
            .collect();

        for id in &ids {
            inner.commit(Frame::RemoveOperation { id: *id })?;
        }

        self.maybe_compact(&mut inner);
        Ok(ids.len())
    }

    /// Writes a cached record.
    ///
    /// With `only_if_settled`, nothing is written while a pending or
    /// in-flight operation targets the key; the check and the write happen
    /// under one lock. Returns whether the record was written.
    pub(crate) fn put_record(&self, record: CachedRecord, only_if_settled: bool) -> CoreResult<bool> {
        let mut inner = self.inner.lock();
        if only_if_settled && inner.has_unsettled_for(&record.key) {
            return Ok(false);
        }
        inner.commit(Frame::PutRecord(record))?;
        self.maybe_compact(&mut inner);
        Ok(true)
    }

    /// Removes a cached record, with the same `only_if_settled` rule as
    /// [`Self::put_record`]. Returns whether a record was removed.
    pub(crate) fn remove_record(&self, key: &RecordKey, only_if_settled: bool) -> CoreResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.records.contains_key(key) {
            return Ok(false);
        }
        if only_if_settled && inner.has_unsettled_for(key) {
            return Ok(false);
        }
        inner.commit(Frame::RemoveRecord { key: key.clone() })?;
        self.maybe_compact(&mut inner);
        Ok(true)
    }

    fn maybe_compact(&self, inner: &mut StoreInner) {
        let threshold = self.config.compact_threshold;
        if threshold == 0 || inner.superseded() < threshold {
            return;
        }
        if let Err(e) = inner.compact() {
            tracing::warn!(error = %e, "store log compaction failed, keeping full log");
        }
    }
}
