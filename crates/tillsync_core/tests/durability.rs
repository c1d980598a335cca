//! Restart and crash-recovery tests against a real store directory.

use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tillsync_core::{
    scan_log, CachedValue, CoreError, DurableStore, ManualClock, OperationKind, OperationQueue,
    OperationState, RecordCache, RecordKey, StateFilter, StoreConfig, SyncMode, Target, Timestamp,
};
use tillsync_storage::{FileBackend, StorageBackend};

fn open(path: &Path) -> Arc<DurableStore> {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
    Arc::new(DurableStore::open(path, StoreConfig::default(), clock).unwrap())
}

#[test]
fn queued_operations_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till");

    let (sale, restock) = {
        let store = open(&path);
        let queue = OperationQueue::new(store.clone());
        let sale = queue
            .enqueue(
                OperationKind::RecordSale,
                Target::collection("sales"),
                json!({"items": [{"product_id": "P-1", "quantity": 2}]}),
            )
            .unwrap();
        let restock = queue
            .enqueue(
                OperationKind::Restock,
                Target::record("products", "P-1"),
                json!({"quantity": 5}),
            )
            .unwrap();
        queue.mark_in_flight(&sale).unwrap();
        (sale, restock)
    };

    let store = open(&path);
    assert_eq!(store.recovery().operations, 2);
    assert_eq!(store.recovery().in_flight, 1);

    let queue = OperationQueue::new(store);
    let order: Vec<_> = queue.list(StateFilter::All).map(|op| op.id).collect();
    assert_eq!(order, vec![sale, restock]);

    queue.recover_in_flight().unwrap();
    let op = queue.get(&sale).unwrap();
    assert_eq!(op.state, OperationState::Pending);
    assert_eq!(op.attempts, 1);
    assert_eq!(queue.peek_next().unwrap().id, sale);
}

#[test]
fn cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till");
    let key = RecordKey::new("customers", "C-7");

    {
        let cache = RecordCache::new(open(&path));
        cache.confirm(key.clone(), json!({"balance": 40})).unwrap();
        cache.put_local(key.clone(), CachedValue::Tombstone).unwrap();
    }

    let cache = RecordCache::new(open(&path));
    let record = cache.get(&key).unwrap();
    assert_eq!(record.value, CachedValue::Tombstone);
    assert!(record.is_local_pending());
    assert!(record.synced_at.is_some());
}

#[test]
fn torn_tail_is_recovered_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till");

    let kept = {
        let queue = OperationQueue::new(open(&path));
        queue
            .enqueue(OperationKind::RecordSale, Target::collection("sales"), json!({"n": 1}))
            .unwrap()
    };

    let log_path = path.join("store.log");
    let intact = std::fs::metadata(&log_path).unwrap().len();
    {
        // Half a frame, as if the process died mid-write.
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(b"TSLG\x01\x00\x01\xff\x00\x00\x00partial").unwrap();
    }

    let store = open(&path);
    assert!(store.recovery().torn_bytes > 0);
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), intact);

    let queue = OperationQueue::new(store);
    assert_eq!(queue.peek_next().unwrap().id, kept);
    let next = queue
        .enqueue(OperationKind::RecordSale, Target::collection("sales"), json!({"n": 2}))
        .unwrap();
    drop(queue);

    let queue = OperationQueue::new(open(&path));
    let ids: Vec<_> = queue.list(StateFilter::All).map(|op| op.id).collect();
    assert_eq!(ids, vec![kept, next]);
}

#[test]
fn mid_log_damage_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till");

    {
        let queue = OperationQueue::new(open(&path));
        for n in 0..3 {
            queue
                .enqueue(OperationKind::RecordSale, Target::collection("sales"), json!({ "n": n }))
                .unwrap();
        }
    }

    let log_path = path.join("store.log");
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes[20] ^= 0x5a;
    std::fs::write(&log_path, &bytes).unwrap();

    let clock = Arc::new(ManualClock::default());
    let result = DurableStore::open(&path, StoreConfig::default(), clock);
    assert!(matches!(result, Err(CoreError::ChecksumMismatch { offset: 0, .. })));
}

#[test]
fn second_open_is_locked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till");

    let _first = open(&path);
    let clock = Arc::new(ManualClock::default());
    let second = DurableStore::open(&path, StoreConfig::default(), clock);
    assert!(matches!(second, Err(CoreError::StoreLocked)));
}

#[test]
fn compaction_on_disk_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till");
    let config = StoreConfig::new()
        .compact_threshold(4)
        .sync_mode(SyncMode::Flush);

    let id = {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(DurableStore::open(&path, config, clock).unwrap());
        let queue = OperationQueue::new(store.clone());
        let id = queue
            .enqueue(OperationKind::RecordSale, Target::collection("sales"), json!({}))
            .unwrap();
        for _ in 0..4 {
            queue.mark_in_flight(&id).unwrap();
            queue.mark_failed_retryable(&id, "503").unwrap();
        }
        assert!(store.stats().frames < 9);
        id
    };

    let backend = FileBackend::open(&path.join("store.log")).unwrap();
    let scan = scan_log(&backend).unwrap();
    assert!(scan.frames.len() < 9);
    assert_eq!(scan.valid_len, backend.size().unwrap());

    let queue = OperationQueue::new(open(&path));
    assert_eq!(queue.get(&id).unwrap().attempts, 4);
}
