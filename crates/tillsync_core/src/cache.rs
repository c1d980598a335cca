//! Read-through cache of server records plus optimistic local writes.

use crate::error::CoreResult;
use crate::store::DurableStore;
use crate::types::{CachedRecord, CachedValue, RecordKey, RecordOrigin};
use serde_json::Value;
use std::sync::Arc;

/// Cached reads, persisted in the same store as the queue.
///
/// Entries are either confirmed server truth or optimistic values written
/// when an operation was enqueued, told apart by [`RecordOrigin`].
#[derive(Debug, Clone)]
pub struct RecordCache {
    store: Arc<DurableStore>,
}

impl RecordCache {
    /// Creates a cache view over a store.
    #[must_use]
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Returns one cached record, tombstones included.
    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<CachedRecord> {
        self.store.record(key)
    }

    /// Returns the live value of a record, hiding tombstones.
    #[must_use]
    pub fn value(&self, key: &RecordKey) -> Option<Value> {
        self.get(key)
            .and_then(|record| record.value.as_value().cloned())
    }

    /// Returns every cached record of a resource, ordered by id.
    #[must_use]
    pub fn records(&self, resource: &str) -> Vec<CachedRecord> {
        self.store.records(Some(resource))
    }

    /// Returns the keys cached for a resource.
    #[must_use]
    pub fn keys_for(&self, resource: &str) -> Vec<RecordKey> {
        self.records(resource)
            .into_iter()
            .map(|record| record.key)
            .collect()
    }

    /// Writes an optimistic value (or tombstone) ahead of confirmation.
    ///
    /// Keeps the last confirmed `synced_at` of the entry it replaces.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the entry could not be persisted.
    pub fn put_local(&self, key: RecordKey, value: CachedValue) -> CoreResult<CachedRecord> {
        let synced_at = self.get(&key).and_then(|r| r.synced_at);
        let record = CachedRecord {
            key,
            value,
            origin: RecordOrigin::LocalPending,
            synced_at,
            updated_at: self.store.clock().now(),
        };
        self.store.put_record(record.clone(), false)?;
        Ok(record)
    }

    /// Stores a server-confirmed value unconditionally.
    ///
    /// Used when the remote service answers an executed operation with the
    /// resulting record.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the entry could not be persisted.
    pub fn confirm(&self, key: RecordKey, value: Value) -> CoreResult<CachedRecord> {
        let record = self.server_record(key, value);
        self.store.put_record(record.clone(), false)?;
        Ok(record)
    }

    /// Stores a server value unless a pending or in-flight operation still
    /// targets the key. Returns whether the value was stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the entry could not be persisted.
    pub fn confirm_if_settled(&self, key: RecordKey, value: Value) -> CoreResult<bool> {
        let record = self.server_record(key, value);
        self.store.put_record(record, true)
    }

    /// Removes an entry. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the removal could not be persisted.
    pub fn remove(&self, key: &RecordKey) -> CoreResult<bool> {
        self.store.remove_record(key, false)
    }

    /// Removes an entry unless a pending or in-flight operation still
    /// targets the key. Returns whether an entry was removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the removal could not be persisted.
    pub fn remove_if_settled(&self, key: &RecordKey) -> CoreResult<bool> {
        self.store.remove_record(key, true)
    }

    fn server_record(&self, key: RecordKey, value: Value) -> CachedRecord {
        let now = self.store.clock().now();
        CachedRecord {
            key,
            value: CachedValue::Present(value),
            origin: RecordOrigin::Server,
            synced_at: Some(now),
            updated_at: now,
        }
    }
}
