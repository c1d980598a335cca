//! CLI command implementations.

pub mod ack;
pub mod cache;
pub mod compact;
pub mod list;
pub mod purge;
pub mod status;
pub mod verify;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tillsync_core::{CoreError, DurableStore, StoreConfig, SystemClock};

/// Result type of every command.
pub type CommandResult<T = ()> = Result<T, Box<dyn Error>>;

/// Output format of the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing store directory, taking its lock.
pub(crate) fn open_store(path: &Path) -> CommandResult<Arc<DurableStore>> {
    let config = StoreConfig::new().create_if_missing(false);
    match DurableStore::open(path, config, Arc::new(SystemClock)) {
        Ok(store) => Ok(Arc::new(store)),
        Err(CoreError::StoreLocked) => Err(format!(
            "store at {} is in use; stop the till first",
            path.display()
        )
        .into()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tillsync_core::{
        DurableStore, ManualClock, OperationId, OperationKind, OperationQueue, RecordCache,
        RecordKey, StoreConfig, Target, Timestamp,
    };

    /// A store directory holding a pending sale, a completed restock, a
    /// dead payment and one cached product.
    pub struct Seeded {
        pub dir: TempDir,
        pub pending: OperationId,
        pub completed: OperationId,
        pub dead: OperationId,
    }

    impl Seeded {
        pub fn path(&self) -> PathBuf {
            self.dir.path().join("till")
        }
    }

    pub fn seeded() -> Seeded {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("till");
        let (pending, completed, dead) = seed(&path);
        Seeded {
            dir,
            pending,
            completed,
            dead,
        }
    }

    fn seed(path: &Path) -> (OperationId, OperationId, OperationId) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
        let store = Arc::new(DurableStore::open(path, StoreConfig::default(), clock).unwrap());
        let queue = OperationQueue::new(store.clone());

        let completed = queue
            .enqueue(
                OperationKind::Restock,
                Target::record("products", "P-1"),
                json!({"quantity": 5}),
            )
            .unwrap();
        queue.mark_in_flight(&completed).unwrap();
        queue.mark_completed(&completed).unwrap();

        let dead = queue
            .enqueue(
                OperationKind::RecordPayment,
                Target::record("customers", "C-1"),
                json!({"amount": 500}),
            )
            .unwrap();
        queue.mark_in_flight(&dead).unwrap();
        queue
            .mark_dead(&dead, "terminal remote failure (conflict): balance below zero")
            .unwrap();

        let pending = queue
            .enqueue(
                OperationKind::RecordSale,
                Target::collection("sales"),
                json!({"items": [{"product_id": "P-1", "quantity": 2}]}),
            )
            .unwrap();

        RecordCache::new(store)
            .confirm(
                RecordKey::new("products", "P-1"),
                json!({"name": "Soap", "stock": 13}),
            )
            .unwrap();

        (pending, completed, dead)
    }
}
