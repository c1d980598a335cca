//! Shared wiring for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tillsync_core::DurableStore;
use tillsync_engine::{
    Connectivity, ConnectivityConfig, ConnectivityMonitor, EngineConfig, OfflineSync,
    RetryConfig, SyncEvent,
};
use tillsync_testkit::{memory_store, InMemoryRemote};
use tokio::sync::broadcast;

pub fn engine_config() -> EngineConfig {
    EngineConfig::default()
        .with_retry(RetryConfig::new(Duration::from_secs(1)).with_jitter(false))
        .with_request_timeout(Duration::from_secs(5))
}

pub struct Harness {
    pub sync: OfflineSync<InMemoryRemote>,
    pub remote: Arc<InMemoryRemote>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub store: Arc<DurableStore>,
}

impl Harness {
    pub fn new(store: Arc<DurableStore>, initial: Connectivity, config: EngineConfig) -> Self {
        Self::with_remote(store, Arc::new(InMemoryRemote::new()), initial, config)
    }

    pub fn with_remote(
        store: Arc<DurableStore>,
        remote: Arc<InMemoryRemote>,
        initial: Connectivity,
        config: EngineConfig,
    ) -> Self {
        let monitor = ConnectivityMonitor::spawn(initial, ConnectivityConfig::default());
        let sync = OfflineSync::new(store.clone(), remote.clone(), monitor.clone(), config);
        Self {
            sync,
            remote,
            monitor,
            store,
        }
    }

    pub fn online() -> Self {
        let (store, _) = memory_store();
        Self::new(store, Connectivity::Online, engine_config())
    }

    pub fn offline() -> Self {
        let (store, _) = memory_store();
        Self::new(store, Connectivity::Offline, engine_config())
    }

    /// Reports a connectivity change and waits out the debounce.
    pub async fn go(&self, state: Connectivity) {
        self.monitor.report(state.is_online());
        tokio::time::sleep(ConnectivityConfig::default().min_dwell + Duration::from_millis(100))
            .await;
        assert_eq!(self.monitor.current(), state);
    }
}

/// Returns every event already delivered to `rx`.
pub fn received(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
