//! Frame-by-frame replay of the store log.

use crate::error::{CoreError, CoreResult};
use crate::log::frame::{compute_crc32, Frame, FrameType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
use tillsync_storage::StorageBackend;

/// Result of reading a store log from the start.
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    /// Every intact frame with its offset, in log order.
    pub frames: Vec<(u64, Frame)>,
    /// Length of the intact prefix of the log.
    pub valid_len: u64,
    /// Total length of the log, including any torn tail.
    pub total_len: u64,
}

impl LogScan {
    /// Returns the number of bytes past the last intact frame.
    #[must_use]
    pub fn torn_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }
}

/// Reads every frame of the log without modifying it.
///
/// A partially written final frame (short header, length past the end,
/// bad checksum on the last frame, or a zero-filled tail) ends the scan
/// and is reported through [`LogScan::torn_bytes`]. Damage before the
/// final frame is an error.
///
/// # Errors
///
/// Returns `LogCorruption` or `ChecksumMismatch` for mid-log damage,
/// `InvalidFormat` for an unknown format version, or a storage error.
pub fn scan_log(backend: &dyn StorageBackend) -> CoreResult<LogScan> {
    let total_len = backend.size()?;
    let mut frames = Vec::new();
    let mut offset = 0u64;

    while offset < total_len {
        let remaining = total_len - offset;
        if remaining < (HEADER_SIZE + CRC_SIZE) as u64 {
            break;
        }

        let header = backend.read_at(offset, HEADER_SIZE)?;
        if header[0..4] != LOG_MAGIC {
            if is_zero_tail(backend, offset, total_len)? {
                break;
            }
            return Err(CoreError::log_corruption(offset, "bad frame magic"));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported store log version {version} at offset {offset}"
            )));
        }

        let frame_type = FrameType::from_byte(header[6]).ok_or_else(|| {
            CoreError::log_corruption(offset, format!("unknown frame type {}", header[6]))
        })?;
        let len = u64::from(u32::from_le_bytes([header[7], header[8], header[9], header[10]]));

        let frame_len = HEADER_SIZE as u64 + len + CRC_SIZE as u64;
        if frame_len > remaining {
            break;
        }
        let is_last = frame_len == remaining;

        let body = backend.read_at(offset, (HEADER_SIZE as u64 + len) as usize)?;
        let crc_bytes = backend.read_at(offset + HEADER_SIZE as u64 + len, CRC_SIZE)?;
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed = compute_crc32(&body);
        if stored != computed {
            if is_last {
                break;
            }
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected: stored,
                actual: computed,
            });
        }

        let frame = Frame::decode_payload(frame_type, &body[HEADER_SIZE..])
            .map_err(|e| CoreError::log_corruption(offset, e.to_string()))?;
        frames.push((offset, frame));
        offset += frame_len;
    }

    Ok(LogScan {
        frames,
        valid_len: offset,
        total_len,
    })
}

fn is_zero_tail(backend: &dyn StorageBackend, offset: u64, total_len: u64) -> CoreResult<bool> {
    let len = usize::try_from(total_len - offset)
        .map_err(|_| CoreError::log_corruption(offset, "tail too large to inspect"))?;
    Ok(backend.read_at(offset, len)?.iter().all(|&b| b == 0))
}
