//! Sparse frame-ordinal → byte-offset index
//!
//! Each segment header embeds a fixed table of [`INDEX_CAPACITY`] offsets.
//! Entry `i` holds the byte offset of the frame whose segment-local
//! ordinal is `i * stride`. On disk the table is filled back to front:
//! the last slot is the first key frame.
//!
//! ```text
//! stride = 50
//! slot[511] -> frame 0
//! slot[510] -> frame 50
//! slot[509] -> frame 100
//! ```
//!
//! When the table is full and another key frame arrives, the stride is
//! doubled and every other entry is dropped, so the covered range stays
//! uniform. Seeking uses the nearest entry at or before the target and
//! walks forward at most `stride - 1` records.

use crate::stream::format::INDEX_CAPACITY;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTable {
    stride: u32,
    capacity: usize,
    offsets: Vec<u32>,
}

/// Result of offering a frame to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexUpdate {
    /// The frame is not on a stride boundary.
    Skipped,
    /// The frame became a key frame.
    Recorded,
    /// The table was full; the stride doubled before recording.
    StrideDoubled { new_stride: u32, recorded: bool },
}

impl IndexTable {
    pub fn new(stride: u32, capacity: usize) -> Self {
        Self {
            stride: stride.max(1),
            capacity: capacity.clamp(1, INDEX_CAPACITY),
            offsets: Vec::new(),
        }
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.offsets.len() >= self.capacity
    }

    /// (local ordinal, byte offset) pairs in ascending order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let stride = self.stride;
        self.offsets
            .iter()
            .enumerate()
            .map_while(move |(i, &offset)| Some(((i as u32).checked_mul(stride)?, offset)))
    }

    /// Ordinal of the last key frame, or `None` if it does not fit in 32 bits.
    pub fn last_key(&self) -> Option<u32> {
        let last = self.offsets.len().checked_sub(1)?;
        u32::try_from(last).ok()?.checked_mul(self.stride)
    }

    /// Offers the frame at `ordinal` (segment-local) stored at `offset`.
    ///
    /// Frames must be offered in order; anything that is not the next
    /// key frame is skipped.
    pub fn record(&mut self, ordinal: u32, offset: u32) -> IndexUpdate {
        let next_key = self.offsets.len() as u64 * self.stride as u64;
        if ordinal % self.stride != 0 || ordinal as u64 != next_key {
            return IndexUpdate::Skipped;
        }

        if !self.is_full() {
            self.offsets.push(offset);
            return IndexUpdate::Recorded;
        }

        let new_stride = self.stride.saturating_mul(2);
        self.resample(new_stride);
        let next_key = self.offsets.len() as u64 * self.stride as u64;
        let recorded = ordinal as u64 == next_key && !self.is_full();
        if recorded {
            self.offsets.push(offset);
        }
        IndexUpdate::StrideDoubled {
            new_stride,
            recorded,
        }
    }

    /// Coarsens the table to `new_stride`, which must be a multiple of the
    /// current stride. Smaller or incompatible strides are ignored.
    pub fn resample(&mut self, new_stride: u32) {
        if new_stride <= self.stride || new_stride % self.stride != 0 {
            return;
        }
        let step = (new_stride / self.stride) as usize;
        self.offsets = self.offsets.iter().step_by(step).copied().collect();
        self.stride = new_stride;
    }

    /// Nearest key frame at or before `ordinal`.
    pub fn nearest(&self, ordinal: u32) -> Option<(u32, u32)> {
        if self.offsets.is_empty() {
            return None;
        }
        let slot = ((ordinal / self.stride) as usize).min(self.offsets.len() - 1);
        Some(((slot as u32).checked_mul(self.stride)?, self.offsets[slot]))
    }

    /// Legacy reverse-filled slot array.
    pub fn to_slots(&self) -> [u32; INDEX_CAPACITY] {
        let mut slots = [0u32; INDEX_CAPACITY];
        for (i, &offset) in self.offsets.iter().enumerate() {
            slots[INDEX_CAPACITY - 1 - i] = offset;
        }
        slots
    }

    /// Rebuilds a table from the legacy slot array.
    pub fn from_slots(slots: &[u32; INDEX_CAPACITY], count: usize, stride: u32) -> Self {
        let count = count.min(INDEX_CAPACITY);
        let offsets = (0..count).map(|i| slots[INDEX_CAPACITY - 1 - i]).collect();
        Self {
            stride: stride.max(1),
            capacity: INDEX_CAPACITY,
            offsets,
        }
    }

    /// Checks that offsets increase strictly and lie in `[min, max)`.
    pub fn validate(&self, min: u64, max: u64) -> std::result::Result<(), String> {
        if !self.is_empty() && self.last_key().is_none() {
            return Err(format!(
                "{} index entries at stride {} overflow 32-bit ordinals",
                self.len(),
                self.stride
            ));
        }
        let mut previous: Option<u32> = None;
        for (ordinal, offset) in self.entries() {
            if (offset as u64) < min || offset as u64 >= max {
                return Err(format!(
                    "index entry for frame {ordinal} points to {offset}, outside {min}..{max}"
                ));
            }
            if let Some(prev) = previous {
                if offset <= prev {
                    return Err(format!(
                        "index entry for frame {ordinal} is not after the previous entry"
                    ));
                }
            }
            previous = Some(offset);
        }
        Ok(())
    }
}
