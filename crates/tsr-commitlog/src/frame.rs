//! Length and CRC framing shared by the metadata header and ring records.
//!
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode)]
//! ```
//!
//! A zero length marks an unwritten region.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{LogError, LogResult};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Serialize `value` into a complete frame.
pub fn encode<T: Serialize>(value: &T) -> LogResult<Vec<u8>> {
    let payload =
        bincode::serialize(value).map_err(|e| LogError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len()).map_err(|_| LogError::InvalidRecordLength {
        offset: 0,
        length: u32::MAX,
    })?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Total frame size at the start of `buf`, or `None` for an unwritten region.
pub fn peek_len(buf: &[u8], offset: u64) -> LogResult<Option<usize>> {
    if buf.len() < HEADER_SIZE {
        return Err(LogError::InvalidRecordLength { offset, length: 0 });
    }
    let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if length == 0 {
        return Ok(None);
    }
    let total = HEADER_SIZE + length as usize;
    if total > buf.len() {
        return Err(LogError::InvalidRecordLength { offset, length });
    }
    Ok(Some(total))
}

/// Decode the frame at the start of `buf`. Returns the value and the number
/// of bytes the frame occupies, or `None` for an unwritten region.
///
/// `offset` is only used in diagnostics.
pub fn decode<T: DeserializeOwned>(buf: &[u8], offset: u64) -> LogResult<Option<(T, usize)>> {
    let Some(total) = peek_len(buf, offset)? else {
        return Ok(None);
    };
    let expected = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let payload = &buf[HEADER_SIZE..total];
    let actual = crc32fast::hash(payload);
    if actual != expected {
        warn!(offset, expected, actual, "frame CRC mismatch");
        return Err(LogError::CrcMismatch {
            offset,
            expected,
            actual,
        });
    }
    let value =
        bincode::deserialize(payload).map_err(|e| LogError::Serialization(e.to_string()))?;
    Ok(Some((value, total)))
}
