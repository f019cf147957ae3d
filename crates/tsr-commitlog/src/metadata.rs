use serde::{Deserialize, Serialize};

use crate::config::SLOT_COUNT;
use crate::error::{LogError, LogResult};
use crate::frame;

/// Slot table value of an unoccupied slot.
pub const FREE_SLOT: i64 = -1;

/// `master` value when no writer owns flushing.
pub const NO_MASTER: i32 = -1;

/// The shared metadata header.
///
/// `offset`/`length` describe the live region of the ring. `length`
/// includes `padding`, the unused tail skipped when a record wrapped to
/// offset 0; that span always ends at the physical end of the ring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMetadata {
    /// Last generation each writer slot has seen, or [`FREE_SLOT`].
    pub slots: Vec<i64>,
    pub current_generation: i64,
    pub offset: u64,
    pub length: u64,
    pub padding: u64,
    /// Slot responsible for durable flushing, or [`NO_MASTER`].
    pub master: i32,
}

impl LogMetadata {
    pub fn fresh() -> Self {
        Self {
            slots: vec![FREE_SLOT; SLOT_COUNT],
            current_generation: 0,
            offset: 0,
            length: 0,
            padding: 0,
            master: NO_MASTER,
        }
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|&g| g == FREE_SLOT)
    }

    /// Occupied slots with their last-seen generation.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, &g)| g != FREE_SLOT)
            .map(|(i, &g)| (i, g))
    }

    pub fn all_free(&self) -> bool {
        self.occupied().next().is_none()
    }

    /// Last generation `slot` has seen; an unset value counts as 0.
    pub fn seen(&self, slot: usize) -> i64 {
        self.slots.get(slot).copied().unwrap_or(0).max(0)
    }

    /// Oldest generation still unseen by some writer is `min_seen() + 1`.
    pub fn min_seen(&self) -> Option<i64> {
        self.occupied().map(|(_, g)| g.max(0)).min()
    }

    pub fn master_slot(&self) -> Option<usize> {
        usize::try_from(self.master).ok()
    }

    pub fn is_master(&self, slot: usize) -> bool {
        self.master_slot() == Some(slot)
    }

    pub fn free_space(&self, capacity: u64) -> u64 {
        capacity.saturating_sub(self.length)
    }

    /// Drop the live region. Generations and slots are kept.
    pub fn reset_region(&mut self) {
        self.offset = 0;
        self.length = 0;
        self.padding = 0;
    }

    /// Read the header from the start of the metadata segment. An unwritten
    /// segment yields a fresh header.
    pub fn read_from(buf: &[u8]) -> LogResult<Self> {
        let Some((meta, _)) = frame::decode::<LogMetadata>(buf, 0)? else {
            return Ok(Self::fresh());
        };
        if meta.slots.len() != SLOT_COUNT {
            return Err(LogError::Corrupt(format!(
                "slot table has {} entries, expected {SLOT_COUNT}",
                meta.slots.len()
            )));
        }
        if meta.padding > meta.length {
            return Err(LogError::Corrupt(format!(
                "padding {} exceeds live length {}",
                meta.padding, meta.length
            )));
        }
        Ok(meta)
    }

    pub fn write_to(&self, buf: &mut [u8]) -> LogResult<()> {
        let frame = frame::encode(self)?;
        if frame.len() > buf.len() {
            return Err(LogError::Corrupt(format!(
                "metadata frame of {} bytes exceeds segment of {}",
                frame.len(),
                buf.len()
            )));
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(())
    }
}

impl Default for LogMetadata {
    fn default() -> Self {
        Self::fresh()
    }
}
