//! # tillsync storage
//!
//! Byte-level storage backends for the tillsync durable store.
//!
//! Backends are **opaque byte stores**: they never interpret what the
//! store log writes into them. The framing, checksums and replay of the
//! operation queue and record cache live in `tillsync_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral stores
//! - [`FileBackend`] - Persistent storage on the local file system
//!
//! ## Example
//!
//! ```rust
//! use tillsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"sale:42").unwrap();
//! let data = backend.read_at(offset, 7).unwrap();
//! assert_eq!(&data, b"sale:42");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
