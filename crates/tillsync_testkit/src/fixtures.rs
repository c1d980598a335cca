//! Test fixtures and store helpers.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tillsync_core::{DurableStore, ManualClock, StoreConfig, Timestamp};
use tillsync_storage::StorageBackend;

/// Start time of every manual clock the fixtures hand out.
pub const EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Returns a manual clock at [`EPOCH_MILLIS`].
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp::from_millis(EPOCH_MILLIS)))
}

/// Returns an in-memory store and its clock.
pub fn memory_store() -> (Arc<DurableStore>, Arc<ManualClock>) {
    let clock = manual_clock();
    let store = Arc::new(DurableStore::in_memory(clock.clone()));
    (store, clock)
}

/// Opens a store over `backend` with the default config.
pub fn store_over(backend: Box<dyn StorageBackend>, clock: Arc<ManualClock>) -> Arc<DurableStore> {
    Arc::new(
        DurableStore::with_backend(backend, StoreConfig::default(), clock)
            .expect("Failed to open store over backend"),
    )
}

/// A file-backed store in a temporary directory.
///
/// [`TestStore::reopen`] simulates a process restart: the store is
/// dropped and opened again from disk.
pub struct TestStore {
    /// The open store.
    pub store: Arc<DurableStore>,
    /// The clock shared across reopens.
    pub clock: Arc<ManualClock>,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Creates a fresh store directory.
    pub fn file() -> Self {
        Self::file_with(StoreConfig::default())
    }

    /// Creates a fresh store directory with `config`.
    pub fn file_with(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("till");
        let clock = manual_clock();
        let store = Arc::new(
            DurableStore::open(&path, config, clock.clone()).expect("Failed to open store"),
        );
        Self {
            store,
            clock,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drops the store and opens it again.
    ///
    /// Panics if anything else still holds the store.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            clock,
            path,
            _temp_dir,
        } = self;
        let config = store.config().clone();
        drop(store);

        let store = Arc::new(
            DurableStore::open(&path, config, clock.clone()).expect("Failed to reopen store"),
        );
        Self {
            store,
            clock,
            path,
            _temp_dir,
        }
    }
}

/// A product with the given stock.
pub fn product(name: &str, stock: i64) -> Value {
    json!({ "name": name, "stock": stock })
}

/// A customer with the given credit balance.
pub fn customer(name: &str, balance: i64) -> Value {
    json!({ "name": name, "balance": balance })
}

/// A sale payload of `(product_id, quantity)` lines.
pub fn sale_payload(lines: &[(&str, i64)]) -> Value {
    let items: Vec<Value> = lines
        .iter()
        .map(|(product_id, quantity)| json!({ "product_id": product_id, "quantity": quantity }))
        .collect();
    json!({ "items": items })
}

/// A restock payload.
pub fn restock_payload(quantity: i64) -> Value {
    json!({ "quantity": quantity })
}

/// A payment payload.
pub fn payment_payload(amount: i64) -> Value {
    json!({ "amount": amount })
}
