//! Storage fault injection.
//!
//! [`FaultyBackend`] wraps another backend and fails or tears writes on
//! command. The controls are shared through an [`Arc`], so a test can
//! flip them after the backend has been handed to a store.
//!
//! A torn write leaves the partial bytes in the inner backend and marks
//! the backend crashed: every later mutation fails too, as nothing runs
//! after a real crash. Reopen a store over the inner bytes (an
//! [`tillsync_storage::InMemoryBackend`] clone shares them) to test
//! recovery.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tillsync_storage::{StorageBackend, StorageError, StorageResult};

/// Switches controlling a [`FaultyBackend`].
#[derive(Debug)]
pub struct FaultControls {
    fail_appends: AtomicBool,
    fail_flush: AtomicBool,
    exhausted: AtomicBool,
    tear_after: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
}

impl Default for FaultControls {
    fn default() -> Self {
        Self {
            fail_appends: AtomicBool::new(false),
            fail_flush: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            tear_after: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        }
    }
}

impl FaultControls {
    /// Makes appends fail with an I/O error while set.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes flush and sync fail while set.
    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Makes appends fail as on a full disk while set.
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }

    /// Crashes once `bytes` more bytes have been appended, keeping the
    /// part of the crossing write that fits.
    pub fn tear_after(&self, bytes: usize) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.tear_after
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Returns true once a torn write happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.fail_appends.store(false, Ordering::SeqCst);
        self.fail_flush.store(false, Ordering::SeqCst);
        self.exhausted.store(false, Ordering::SeqCst);
        self.tear_after.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(simulated("backend crashed"));
        }
        Ok(())
    }
}

/// A storage backend wrapper that fails on command.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    controls: Arc<FaultControls>,
}

impl FaultyBackend {
    /// Wraps `inner`; returns the backend and its controls.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, Arc<FaultControls>) {
        let controls = Arc::new(FaultControls::default());
        let backend = Self {
            inner,
            controls: Arc::clone(&controls),
        };
        (backend, controls)
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, format!("simulated {what}")))
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let controls = &self.controls;
        controls.check_alive()?;
        if controls.exhausted.load(Ordering::SeqCst) {
            return Err(StorageError::Exhausted("simulated full disk".into()));
        }
        if controls.fail_appends.load(Ordering::SeqCst) {
            return Err(simulated("write failure"));
        }

        let written = controls.bytes_written.load(Ordering::SeqCst);
        let threshold = controls.tear_after.load(Ordering::SeqCst);
        if written.saturating_add(data.len()) > threshold {
            controls.crashed.store(true, Ordering::SeqCst);
            let partial = threshold.saturating_sub(written).min(data.len());
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
            }
            controls
                .bytes_written
                .fetch_add(partial, Ordering::SeqCst);
            return Err(simulated("crash during write"));
        }

        let offset = self.inner.append(data)?;
        controls.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.controls.check_alive()?;
        if self.controls.fail_flush.load(Ordering::SeqCst) {
            return Err(simulated("flush failure"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.controls.check_alive()?;
        if self.controls.fail_flush.load(Ordering::SeqCst) {
            return Err(simulated("sync failure"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.controls.check_alive()?;
        self.inner.truncate(new_size)
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        self.controls.check_alive()?;
        if self.controls.fail_appends.load(Ordering::SeqCst) {
            return Err(simulated("rewrite failure"));
        }
        self.inner.rewrite(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_storage::InMemoryBackend;

    #[test]
    fn passes_through_until_told_otherwise() {
        let inner = InMemoryBackend::new();
        let (mut backend, controls) = FaultyBackend::new(Box::new(inner.clone()));

        backend.append(b"abc").unwrap();
        controls.set_fail_appends(true);
        assert!(backend.append(b"def").is_err());
        controls.set_fail_appends(false);
        backend.append(b"def").unwrap();

        assert_eq!(inner.data(), b"abcdef");
    }

    #[test]
    fn torn_write_keeps_prefix_and_stops_everything() {
        let inner = InMemoryBackend::new();
        let (mut backend, controls) = FaultyBackend::new(Box::new(inner.clone()));

        backend.append(b"head").unwrap();
        controls.tear_after(2);
        assert!(backend.append(b"tail").is_err());
        assert!(controls.has_crashed());
        assert!(backend.truncate(4).is_err());
        assert!(backend.flush().is_err());

        assert_eq!(inner.data(), b"headta");
    }

    #[test]
    fn exhausted_is_classified() {
        let (mut backend, controls) = FaultyBackend::new(Box::new(InMemoryBackend::new()));
        controls.set_exhausted(true);
        assert!(backend.append(b"x").unwrap_err().is_exhausted());
    }
}
