//! Append-only store log.
//!
//! Every change to the durable store is one checksummed frame:
//!
//! ```text
//! | magic "TSLG" (4) | version u16 (2) | type u8 (1) | len u32 (4) | CBOR payload | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The checksum covers everything
//! before it.

mod frame;
mod scan;

pub use frame::{compute_crc32, Frame, FrameType, LOG_MAGIC, LOG_VERSION};
pub use scan::{scan_log, LogScan};

use crate::config::SyncMode;
use crate::error::CoreResult;
use tillsync_storage::StorageBackend;

/// Writer half of the store log.
pub(crate) struct StoreLog {
    backend: Box<dyn StorageBackend>,
    sync_mode: SyncMode,
}

impl StoreLog {
    /// Replays the log and cuts off any torn tail.
    ///
    /// Returns the writer positioned after the last intact frame together
    /// with the replayed frames.
    pub(crate) fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_mode: SyncMode,
    ) -> CoreResult<(Self, LogScan)> {
        let scan = scan_log(backend.as_ref())?;

        if scan.torn_bytes() > 0 {
            tracing::warn!(
                valid_len = scan.valid_len,
                torn_bytes = scan.torn_bytes(),
                "truncating torn tail of store log"
            );
            backend.truncate(scan.valid_len)?;
        }

        Ok((Self { backend, sync_mode }, scan))
    }

    /// Wraps a backend known to be empty without scanning it.
    pub(crate) fn open_empty(backend: Box<dyn StorageBackend>, sync_mode: SyncMode) -> Self {
        Self { backend, sync_mode }
    }

    /// Appends one frame and makes it durable per the sync mode.
    ///
    /// On failure the log is cut back to its previous length so the
    /// caller can leave its in-memory state untouched.
    pub(crate) fn append(&mut self, frame: &Frame) -> CoreResult<u64> {
        let data = frame.encode()?;
        let before = self.backend.size()?;

        let result = self.backend.append(&data).and_then(|offset| {
            match self.sync_mode {
                SyncMode::Flush => self.backend.flush()?,
                SyncMode::Sync => self.backend.sync()?,
            }
            Ok(offset)
        });

        match result {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if let Err(rollback) = self.rollback(before) {
                    tracing::warn!(error = %rollback, "could not cut back failed frame");
                }
                Err(e.into())
            }
        }
    }

    /// Replaces the whole log with `frames`.
    pub(crate) fn rewrite(&mut self, frames: &[Frame]) -> CoreResult<()> {
        let mut data = Vec::new();
        for frame in frames {
            data.extend_from_slice(&frame.encode()?);
        }
        self.backend.rewrite(&data)?;
        Ok(())
    }

    /// Returns the current log length.
    pub(crate) fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    fn rollback(&mut self, len: u64) -> CoreResult<()> {
        let size = self.backend.size()?;
        if size > len {
            self.backend.truncate(len)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::frame::HEADER_SIZE;
    use super::*;
    use crate::error::CoreError;
    use crate::types::{OperationId, RecordKey};
    use tillsync_storage::InMemoryBackend;

    fn remove_op() -> Frame {
        Frame::RemoveOperation {
            id: OperationId::new(),
        }
    }

    fn open(backend: &InMemoryBackend) -> (StoreLog, LogScan) {
        StoreLog::open(Box::new(backend.clone()), SyncMode::Sync).unwrap()
    }

    #[test]
    fn append_and_replay() {
        let backend = InMemoryBackend::new();
        let frames = vec![
            remove_op(),
            Frame::RemoveRecord {
                key: RecordKey::new("products", "P-1"),
            },
            remove_op(),
        ];

        {
            let (mut log, scan) = open(&backend);
            assert!(scan.frames.is_empty());
            for frame in &frames {
                log.append(frame).unwrap();
            }
        }

        let (log, scan) = open(&backend);
        let replayed: Vec<Frame> = scan.frames.iter().map(|(_, f)| f.clone()).collect();
        assert_eq!(replayed, frames);
        assert_eq!(scan.torn_bytes(), 0);
        assert_eq!(log.size().unwrap(), backend.data().len() as u64);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let first = remove_op();
        let mut bytes = first.encode().unwrap();
        let intact = bytes.len() as u64;
        let second = remove_op().encode().unwrap();
        bytes.extend_from_slice(&second[..second.len() / 2]);

        let backend = InMemoryBackend::with_data(bytes);
        let (_log, scan) = open(&backend);

        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.frames[0].1, first);
        assert_eq!(scan.valid_len, intact);
        assert_eq!(backend.data().len() as u64, intact);
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn() {
        let mut bytes = remove_op().encode().unwrap();
        let keep = bytes.len() as u64;
        let mut last = remove_op().encode().unwrap();
        let end = last.len() - 1;
        last[end] ^= 0xff;
        bytes.extend_from_slice(&last);

        let backend = InMemoryBackend::with_data(bytes);
        let (_log, scan) = open(&backend);
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(backend.data().len() as u64, keep);
    }

    #[test]
    fn bad_checksum_mid_log_is_corruption() {
        let mut first = remove_op().encode().unwrap();
        first[HEADER_SIZE] ^= 0xff;
        let mut bytes = first;
        bytes.extend_from_slice(&remove_op().encode().unwrap());

        let backend = InMemoryBackend::with_data(bytes);
        let result = StoreLog::open(Box::new(backend), SyncMode::Sync);
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { offset: 0, .. })));
    }

    #[test]
    fn zero_filled_tail_is_torn() {
        let mut bytes = remove_op().encode().unwrap();
        let keep = bytes.len() as u64;
        bytes.extend_from_slice(&[0u8; 64]);

        let backend = InMemoryBackend::with_data(bytes);
        let (_log, scan) = open(&backend);
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.torn_bytes(), 64);
        assert_eq!(backend.data().len() as u64, keep);
    }

    #[test]
    fn garbage_magic_is_corruption() {
        let mut bytes = remove_op().encode().unwrap();
        bytes.extend_from_slice(b"not a frame at all, definitely not");

        let result = StoreLog::open(Box::new(InMemoryBackend::with_data(bytes)), SyncMode::Flush);
        assert!(matches!(result, Err(CoreError::LogCorruption { .. })));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = remove_op().encode().unwrap();
        bytes[4] = 9;

        let result = StoreLog::open(Box::new(InMemoryBackend::with_data(bytes)), SyncMode::Flush);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn rewrite_replaces_history() {
        let backend = InMemoryBackend::new();
        let (mut log, _) = open(&backend);
        for _ in 0..10 {
            log.append(&remove_op()).unwrap();
        }

        let keep = remove_op();
        log.rewrite(std::slice::from_ref(&keep)).unwrap();

        let (_log, scan) = open(&backend);
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.frames[0].1, keep);
    }
}
