//! Store log frame types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{CachedRecord, OperationId, QueuedOperation, RecordKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"TSLG";

/// Current frame format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Insert or replace a queued operation.
    PutOperation = 1,
    /// Drop a queued operation.
    RemoveOperation = 2,
    /// Insert or replace a cached record.
    PutRecord = 3,
    /// Drop a cached record.
    RemoveRecord = 4,
}

impl FrameType {
    /// Converts a byte to a frame type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::PutOperation),
            2 => Some(Self::RemoveOperation),
            3 => Some(Self::PutRecord),
            4 => Some(Self::RemoveRecord),
            _ => None,
        }
    }

    /// Converts the frame type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One state change recorded in the store log.
///
/// Frames are whole-value upserts and removals; replaying them in order
/// rebuilds the live state.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Full snapshot of an operation after a change.
    PutOperation(QueuedOperation),
    /// An operation left the queue (purged or acknowledged).
    RemoveOperation {
        /// The removed operation.
        id: OperationId,
    },
    /// Full snapshot of a cached record after a change.
    PutRecord(CachedRecord),
    /// A cached record left the cache.
    RemoveRecord {
        /// The removed record.
        key: RecordKey,
    },
}

impl Frame {
    /// Returns the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::PutOperation(_) => FrameType::PutOperation,
            Self::RemoveOperation { .. } => FrameType::RemoveOperation,
            Self::PutRecord(_) => FrameType::PutRecord,
            Self::RemoveRecord { .. } => FrameType::RemoveRecord,
        }
    }

    /// Encodes the frame with its envelope and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or exceeds
    /// the 4 GiB length field.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = match self {
            Self::PutOperation(op) => to_cbor(op)?,
            Self::RemoveOperation { id } => to_cbor(id)?,
            Self::PutRecord(record) => to_cbor(record)?,
            Self::RemoveRecord { key } => to_cbor(key)?,
        };

        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::codec("frame payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.frame_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Decodes a frame body of the given type.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the payload is not valid CBOR for the type.
    pub fn decode_payload(frame_type: FrameType, payload: &[u8]) -> CoreResult<Self> {
        Ok(match frame_type {
            FrameType::PutOperation => Self::PutOperation(from_cbor(payload)?),
            FrameType::RemoveOperation => Self::RemoveOperation {
                id: from_cbor(payload)?,
            },
            FrameType::PutRecord => Self::PutRecord(from_cbor(payload)?),
            FrameType::RemoveRecord => Self::RemoveRecord {
                key: from_cbor(payload)?,
            },
        })
    }
}

fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(payload: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(payload).map_err(|e| CoreError::codec(e.to_string()))
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CachedValue, OperationKind, OperationState, RecordOrigin, Target, Timestamp,
    };
    use serde_json::json;

    fn sample_operation() -> QueuedOperation {
        QueuedOperation {
            id: OperationId::new(),
            sequence: 7,
            kind: OperationKind::RecordSale,
            target: Target::collection("sales"),
            payload: json!({"items": [{"product_id": "P-1", "quantity": 2}], "total": 19.5}),
            created_at: Timestamp::from_millis(1_700_000_000_000),
            updated_at: Timestamp::from_millis(1_700_000_000_000),
            attempts: 1,
            max_attempts: 5,
            state: OperationState::Pending,
            last_error: Some("timed out".into()),
        }
    }

    #[test]
    fn frame_type_bytes() {
        for t in [
            FrameType::PutOperation,
            FrameType::RemoveOperation,
            FrameType::PutRecord,
            FrameType::RemoveRecord,
        ] {
            assert_eq!(FrameType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(FrameType::from_byte(0), None);
        assert_eq!(FrameType::from_byte(99), None);
    }

    #[test]
    fn envelope_layout() {
        let frame = Frame::RemoveOperation {
            id: OperationId::new(),
        };
        let bytes = frame.encode().unwrap();

        assert_eq!(&bytes[0..4], b"TSLG");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), LOG_VERSION);
        assert_eq!(bytes[6], FrameType::RemoveOperation.as_byte());

        let len = u32::from_le_bytes(bytes[7..11].try_into().unwrap()) as usize;
        assert_eq!(bytes.len(), HEADER_SIZE + len + CRC_SIZE);

        let crc_at = bytes.len() - CRC_SIZE;
        let stored = u32::from_le_bytes(bytes[crc_at..].try_into().unwrap());
        assert_eq!(stored, compute_crc32(&bytes[..crc_at]));
    }

    #[test]
    fn operation_payload_decodes() {
        let op = sample_operation();
        let bytes = Frame::PutOperation(op.clone()).encode().unwrap();
        let payload = &bytes[HEADER_SIZE..bytes.len() - CRC_SIZE];

        let decoded = Frame::decode_payload(FrameType::PutOperation, payload).unwrap();
        assert_eq!(decoded, Frame::PutOperation(op));
    }

    #[test]
    fn tombstone_is_not_null() {
        let key = RecordKey::new("customers", "C-9");
        let tombstone = CachedRecord {
            key: key.clone(),
            value: CachedValue::Tombstone,
            origin: RecordOrigin::LocalPending,
            synced_at: None,
            updated_at: Timestamp::from_millis(5),
        };
        let null = CachedRecord {
            value: CachedValue::Present(serde_json::Value::Null),
            ..tombstone.clone()
        };

        for record in [tombstone, null] {
            let bytes = Frame::PutRecord(record.clone()).encode().unwrap();
            let payload = &bytes[HEADER_SIZE..bytes.len() - CRC_SIZE];
            assert_eq!(
                Frame::decode_payload(FrameType::PutRecord, payload).unwrap(),
                Frame::PutRecord(record)
            );
        }
    }

    #[test]
    fn garbage_payload_is_codec_error() {
        let result = Frame::decode_payload(FrameType::PutRecord, &[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CoreError::Codec { .. })));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
