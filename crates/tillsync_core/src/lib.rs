//! # tillsync core
//!
//! Durable operation queue and record cache for an offline-first point of
//! sale client.
//!
//! This crate provides:
//! - The data model ([`QueuedOperation`], [`CachedRecord`] and friends)
//! - [`DurableStore`], a checksummed append-only log replayed on open
//! - [`OperationQueue`], the FIFO log of unconfirmed write intents
//! - [`RecordCache`], last-known server records plus optimistic writes
//! - [`RemoteDataService`], the boundary to the system of record
//!
//! ## Key Invariants
//!
//! - An operation is durable before `enqueue` returns
//! - Operations drain in enqueue order; retries never reorder them
//! - Terminal states (`completed`, `dead`) are never left
//! - Dead operations stay until explicitly acknowledged

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod dir;
mod error;
pub mod log;
mod queue;
mod remote;
mod store;
mod types;

pub use cache::RecordCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StoreConfig, SyncMode};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use log::{scan_log, LogScan};
pub use queue::{OperationQueue, RetryDisposition};
pub use remote::{
    RemoteDataService, RemoteError, RemoteRecord, RemoteRequest, RemoteResult, TerminalReason,
    TransientReason,
};
pub use store::{DurableStore, RecoveryInfo, StoreStats};
pub use types::{
    CacheEffect, CachedRecord, CachedValue, OperationId, OperationKind, OperationState,
    QueueStatus, QueuedOperation, RecordKey, RecordOrigin, StateFilter, Target, Timestamp,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
