//! # tillsync testkit
//!
//! Test utilities for tillsync.
//!
//! This crate provides:
//! - [`InMemoryRemote`], a scriptable stand-in for the retail back end
//! - [`FaultyBackend`], a storage backend that fails or tears writes
//! - Fixtures for stores and business payloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tillsync_testkit::prelude::*;
//!
//! let remote = InMemoryRemote::new();
//! remote.seed("products", "P-1", product(10));
//! remote.fail_next(RemoteError::timeout("slow"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::remote::*;
}

pub use faulty::*;
pub use fixtures::*;
pub use remote::*;
