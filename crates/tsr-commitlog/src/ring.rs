//! Ring buffer of framed [`CommitRecord`]s.
//!
//! The live region starts at `offset` and spans `length` bytes, wrapping
//! at the physical end. A record never straddles the end: when it does not
//! fit in the tail, the tail is skipped and recorded as `padding`.

use tracing::debug;

use crate::error::{LogError, LogResult};
use crate::frame;
use crate::metadata::LogMetadata;
use crate::record::CommitRecord;

/// Why an append did not happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoRoom {
    pub needed: u64,
    /// Largest contiguous span that could have been written.
    pub available: u64,
}

/// A decoded record and its position in the ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingEntry {
    pub offset: u64,
    pub size: u64,
    pub record: CommitRecord,
}

fn corrupt(msg: String) -> LogError {
    LogError::Corrupt(msg)
}

/// Append `frame` after the live region. On `NoRoom` neither `ring` nor
/// `meta` is modified.
pub fn append(ring: &mut [u8], meta: &mut LogMetadata, frame: &[u8]) -> Result<u64, NoRoom> {
    let capacity = ring.len() as u64;
    let needed = frame.len() as u64;
    let (offset, length, padding) = if meta.length == 0 {
        (0, 0, 0)
    } else {
        (meta.offset, meta.length, meta.padding)
    };
    let free = capacity.saturating_sub(length);
    let end = (offset + length) % capacity;

    let wrapped = length > 0 && end <= offset;
    let (write_at, skipped, available) = if wrapped {
        (end, 0, free)
    } else {
        let tail = capacity - end;
        if needed <= tail {
            (end, 0, tail.max(offset))
        } else {
            (0, tail, tail.max(offset))
        }
    };

    if needed + skipped > free || needed > available {
        return Err(NoRoom { needed, available });
    }

    let start = write_at as usize;
    ring[start..start + frame.len()].copy_from_slice(frame);

    meta.offset = offset;
    meta.length = length + skipped + needed;
    meta.padding = if skipped > 0 { skipped } else { padding };
    if skipped > 0 {
        debug!(padding = skipped, offset, "ring wrapped");
    }
    Ok(write_at)
}

/// Decode every live record in log order.
pub fn scan(ring: &[u8], meta: &LogMetadata) -> LogResult<Vec<RingEntry>> {
    let capacity = ring.len() as u64;
    let mut entries = Vec::new();
    let mut pos = meta.offset;
    let mut remaining = meta.length;

    while remaining > 0 {
        if meta.padding > 0 && pos == capacity - meta.padding {
            remaining = remaining
                .checked_sub(meta.padding)
                .ok_or_else(|| corrupt(format!("padding {} overruns live region", meta.padding)))?;
            pos = 0;
            continue;
        }
        if pos >= capacity {
            return Err(corrupt(format!("record offset {pos} beyond capacity {capacity}")));
        }
        let Some((record, used)) = frame::decode::<CommitRecord>(&ring[pos as usize..], pos)?
        else {
            return Err(corrupt(format!("unwritten frame inside live region at {pos}")));
        };
        let size = used as u64;
        remaining = remaining
            .checked_sub(size)
            .ok_or_else(|| corrupt(format!("record at {pos} overruns live region")))?;
        entries.push(RingEntry {
            offset: pos,
            size,
            record,
        });
        pos += size;
        if pos == capacity {
            pos = 0;
        }
    }
    Ok(entries)
}

/// Discard leading records with generation `<= up_to`. Returns how many
/// records were dropped.
pub fn reclaim(ring: &[u8], meta: &mut LogMetadata, up_to: i64) -> LogResult<usize> {
    let capacity = ring.len() as u64;
    let mut dropped = 0;

    while meta.length > 0 {
        if meta.padding > 0 && meta.offset == capacity - meta.padding {
            meta.length = meta
                .length
                .checked_sub(meta.padding)
                .ok_or_else(|| corrupt(format!("padding {} overruns live region", meta.padding)))?;
            meta.offset = 0;
            meta.padding = 0;
            continue;
        }
        let pos = meta.offset;
        if pos >= capacity {
            return Err(corrupt(format!("record offset {pos} beyond capacity {capacity}")));
        }
        let Some((record, used)) = frame::decode::<CommitRecord>(&ring[pos as usize..], pos)?
        else {
            return Err(corrupt(format!("unwritten frame inside live region at {pos}")));
        };
        if record.generation > up_to {
            break;
        }
        let size = used as u64;
        meta.length = meta
            .length
            .checked_sub(size)
            .ok_or_else(|| corrupt(format!("record at {pos} overruns live region")))?;
        meta.offset = (pos + size) % capacity;
        dropped += 1;
    }

    if meta.length == 0 {
        meta.reset_region();
    }
    if dropped > 0 {
        debug!(dropped, up_to, offset = meta.offset, length = meta.length, "reclaimed ring space");
    }
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChangeBatch;
    use tsr_types::Guid;

    const SOURCE: Guid = Guid::nil();

    fn frame_for(generation: i64) -> Vec<u8> {
        ChangeBatch::new()
            .to_record(generation, SOURCE)
            .encode()
            .unwrap()
    }

    fn frame_len() -> u64 {
        frame_for(1).len() as u64
    }

    fn generations(ring: &[u8], meta: &LogMetadata) -> Vec<i64> {
        scan(ring, meta)
            .unwrap()
            .into_iter()
            .map(|e| e.record.generation)
            .collect()
    }

    // ------------------------------------------------------------------
    // Append and scan
    // ------------------------------------------------------------------

    #[test]
    fn appends_back_to_back() {
        let len = frame_len();
        let mut ring = vec![0u8; (len * 4) as usize];
        let mut meta = LogMetadata::fresh();
        for g in 1..=3 {
            let at = append(&mut ring, &mut meta, &frame_for(g)).unwrap();
            assert_eq!(at, (g as u64 - 1) * len);
        }
        assert_eq!(meta.length, 3 * len);
        assert_eq!(meta.padding, 0);
        assert_eq!(generations(&ring, &meta), vec![1, 2, 3]);
    }

    #[test]
    fn wrap_records_padding_and_scan_skips_it() {
        let len = frame_len();
        let capacity = 3 * len + len / 2;
        let mut ring = vec![0u8; capacity as usize];
        let mut meta = LogMetadata::fresh();
        for g in 1..=3 {
            append(&mut ring, &mut meta, &frame_for(g)).unwrap();
        }
        assert_eq!(reclaim(&ring, &mut meta, 1).unwrap(), 1);
        assert_eq!(meta.offset, len);

        let at = append(&mut ring, &mut meta, &frame_for(4)).unwrap();
        assert_eq!(at, 0);
        assert_eq!(meta.padding, len / 2);
        assert_eq!(meta.length, capacity);
        assert_eq!(generations(&ring, &meta), vec![2, 3, 4]);
    }

    #[test]
    fn reclaim_passes_padding_and_zeroes_it() {
        let len = frame_len();
        let capacity = 3 * len + len / 2;
        let mut ring = vec![0u8; capacity as usize];
        let mut meta = LogMetadata::fresh();
        for g in 1..=3 {
            append(&mut ring, &mut meta, &frame_for(g)).unwrap();
        }
        reclaim(&ring, &mut meta, 1).unwrap();
        append(&mut ring, &mut meta, &frame_for(4)).unwrap();

        assert_eq!(reclaim(&ring, &mut meta, 3).unwrap(), 2);
        assert_eq!(meta.offset, 0);
        assert_eq!(meta.padding, 0);
        assert_eq!(meta.length, len);
        assert_eq!(generations(&ring, &meta), vec![4]);
    }

    #[test]
    fn record_ending_at_physical_end_needs_no_padding() {
        let len = frame_len();
        let mut ring = vec![0u8; (2 * len) as usize];
        let mut meta = LogMetadata::fresh();
        append(&mut ring, &mut meta, &frame_for(1)).unwrap();
        append(&mut ring, &mut meta, &frame_for(2)).unwrap();
        reclaim(&ring, &mut meta, 1).unwrap();

        assert_eq!(append(&mut ring, &mut meta, &frame_for(3)).unwrap(), 0);
        assert_eq!(meta.padding, 0);
        assert_eq!(generations(&ring, &meta), vec![2, 3]);
    }

    // ------------------------------------------------------------------
    // Capacity
    // ------------------------------------------------------------------

    #[test]
    fn full_ring_rejects_without_changes() {
        let len = frame_len();
        let mut ring = vec![0u8; (2 * len + len / 2) as usize];
        let mut meta = LogMetadata::fresh();
        append(&mut ring, &mut meta, &frame_for(1)).unwrap();
        append(&mut ring, &mut meta, &frame_for(2)).unwrap();

        let ring_before = ring.clone();
        let meta_before = meta.clone();
        let err = append(&mut ring, &mut meta, &frame_for(3)).unwrap_err();
        assert_eq!(err.needed, len);
        assert_eq!(err.available, len / 2);
        assert_eq!(ring, ring_before);
        assert_eq!(meta, meta_before);
    }

    #[test]
    fn oversized_record_never_fits() {
        let len = frame_len();
        let mut ring = vec![0u8; (len - 1) as usize];
        let mut meta = LogMetadata::fresh();
        assert!(append(&mut ring, &mut meta, &frame_for(1)).is_err());
        assert_eq!(meta, LogMetadata::fresh());
    }

    #[test]
    fn wrap_needs_room_before_offset() {
        let len = frame_len();
        let capacity = 3 * len + len / 2;
        let mut ring = vec![0u8; capacity as usize];
        let mut meta = LogMetadata::fresh();
        for g in 1..=3 {
            append(&mut ring, &mut meta, &frame_for(g)).unwrap();
        }
        // Half a frame free at the tail plus nothing before offset 0.
        let before = meta.clone();
        assert!(append(&mut ring, &mut meta, &frame_for(4)).is_err());
        assert_eq!(meta, before);
    }

    // ------------------------------------------------------------------
    // Reclamation
    // ------------------------------------------------------------------

    #[test]
    fn reclaiming_everything_resets_region() {
        let len = frame_len();
        let mut ring = vec![0u8; (4 * len) as usize];
        let mut meta = LogMetadata::fresh();
        append(&mut ring, &mut meta, &frame_for(1)).unwrap();
        append(&mut ring, &mut meta, &frame_for(2)).unwrap();
        assert_eq!(reclaim(&ring, &mut meta, 10).unwrap(), 2);
        assert_eq!((meta.offset, meta.length, meta.padding), (0, 0, 0));
        assert!(scan(&ring, &meta).unwrap().is_empty());
    }

    #[test]
    fn reclaim_stops_at_first_unseen_generation() {
        let len = frame_len();
        let mut ring = vec![0u8; (4 * len) as usize];
        let mut meta = LogMetadata::fresh();
        for g in 1..=3 {
            append(&mut ring, &mut meta, &frame_for(g)).unwrap();
        }
        assert_eq!(reclaim(&ring, &mut meta, 0).unwrap(), 0);
        assert_eq!(reclaim(&ring, &mut meta, 2).unwrap(), 2);
        assert_eq!(generations(&ring, &meta), vec![3]);
    }

    #[test]
    fn garbage_in_live_region_is_corrupt() {
        let mut ring = vec![0u8; 256];
        let mut meta = LogMetadata::fresh();
        meta.length = 64;
        assert!(matches!(scan(&ring, &meta), Err(LogError::Corrupt(_))));
        ring[0] = 200;
        assert!(scan(&ring, &meta).is_err());
    }
}
