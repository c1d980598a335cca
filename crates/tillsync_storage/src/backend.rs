//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store underneath the tillsync durable store.
///
/// Backends know nothing about log frames, operations or cached records.
/// The store log in `tillsync_core` owns all interpretation of the bytes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes appended data out of process buffers
/// - `sync` makes appended data and metadata survive power loss
/// - `rewrite` replaces the whole content atomically: a crash leaves
///   either the old bytes or the new bytes, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current size or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. A failed append may leave a
    /// partial tail behind; readers must tolerate it.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes pending writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to cut a torn tail off the store log during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the entire content with `data`.
    ///
    /// Used by log compaction to swap in a snapshot of live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the new content cannot be made durable. An
    /// error before the swap leaves the previous content in place; after
    /// the swap the backend reads and appends the new content, which may
    /// not yet survive power loss.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
