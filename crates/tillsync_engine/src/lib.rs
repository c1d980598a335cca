//! # tillsync engine
//!
//! Replays the durable operation queue against the remote system of
//! record and keeps the record cache close to server truth.
//!
//! This crate provides:
//! - [`SyncEngine`], the single-drain queue processor
//! - Retry with exponential backoff and jitter
//! - [`ConnectivityMonitor`], debounced online/offline tracking
//! - [`CacheReconciler`], server-wins merge of fetched records
//! - [`OfflineSync`], the facade UI code talks to
//!
//! ## Drain model
//!
//! 1. Operations left in flight by a crash return to pending
//! 2. The oldest pending operation is sent, keyed by its id
//! 3. Success completes it; a terminal error dead-letters it and the
//!    drain moves on; a transient error stops the drain until its backoff
//!    expires
//! 4. An emptied queue triggers reconciliation
//!
//! ## Key Invariants
//!
//! - Operations complete in enqueue order
//! - At most one drain runs per queue
//! - Every remote call is bounded by a timeout
//! - Retries reuse the idempotency key

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod engine;
mod error;
mod events;
mod reconcile;
mod service;

pub use config::{ConnectivityConfig, EngineConfig, RetryConfig};
pub use connectivity::{Connectivity, ConnectivityMonitor, ReachabilityProbe};
pub use engine::{DrainStop, SyncEngine, SyncResult};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, SyncEvent};
pub use reconcile::{CacheReconciler, ReconcileReport};
pub use service::OfflineSync;
