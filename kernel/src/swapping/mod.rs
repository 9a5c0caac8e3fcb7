//! Swap space: page-sized slots on a swap block device.
//!
//! Slot `k` occupies sectors `k * SECTORS_PER_PAGE .. (k + 1) * SECTORS_PER_PAGE`,
//! starting at sector 0 with no header. Occupancy is a bitmap with one bit
//! per slot. The bitmap and the device are guarded separately, so allocation
//! never waits on disk I/O.

pub mod page_replacement;

use crate::block::{Block, BlockError, BlockSector, BLOCK_SECTOR_SIZE};
use crate::mem::phys::FrameBytes;
use crate::sync::Mutex;
use bitvec::vec::BitVec;
use core::fmt;
use pagekern_shared::mem::SECTORS_PER_PAGE;

/// Index of the first page-sized slot of a run.
pub type SwapSlot = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// No run of free slots is long enough.
    NoSpace,
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => write!(f, "swap space exhausted"),
        }
    }
}

impl core::error::Error for SwapError {}

pub struct SwapSpace {
    slots: Mutex<BitVec>,
    device: Mutex<Block>,
}

impl SwapSpace {
    pub fn new(device: Block) -> Self {
        let capacity = device.get_size() as usize / SECTORS_PER_PAGE;
        log::info!(
            "swap: {} slots on {}",
            capacity,
            device.get_name()
        );
        Self {
            slots: Mutex::new(BitVec::repeat(false, capacity)),
            device: Mutex::new(device),
        }
    }

    pub fn slot_capacity(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.lock().count_zeros()
    }

    /// Reserves the first run of `count` consecutive free slots and returns
    /// the first one.
    pub fn allocate(&self, count: usize) -> Result<SwapSlot, SwapError> {
        let mut slots = self.slots.lock();
        if count == 0 || count > slots.len() {
            return Err(SwapError::NoSpace);
        }
        let first = slots
            .windows(count)
            .position(|run| run.not_any())
            .ok_or(SwapError::NoSpace)?;
        slots[first..first + count].fill(true);
        log::trace!("swap: allocated slots {first}..{}", first + count);
        Ok(first)
    }

    /// Releases `count` slots starting at `slot`.
    ///
    /// # Panics
    ///
    /// Panics if any slot in the range is not allocated.
    pub fn free(&self, slot: SwapSlot, count: usize) {
        let mut slots = self.slots.lock();
        let run = slots
            .get_mut(slot..slot + count)
            .unwrap_or_else(|| panic!("swap slots {slot}..{} out of range", slot + count));
        assert!(run.all(), "swap slots {slot}..{} freed while free", slot + count);
        run.fill(false);
        log::trace!("swap: freed slots {slot}..{}", slot + count);
    }

    fn first_sector(slot: SwapSlot) -> BlockSector {
        (slot * SECTORS_PER_PAGE) as BlockSector
    }

    /// Writes one page to `slot`.
    pub fn write(&self, slot: SwapSlot, page: &FrameBytes) -> Result<(), BlockError> {
        let mut device = self.device.lock();
        let first = Self::first_sector(slot);
        for (i, sector) in page.chunks_exact(BLOCK_SECTOR_SIZE).enumerate() {
            device.write(first + i as BlockSector, sector)?;
        }
        Ok(())
    }

    /// Reads one page from `slot`.
    pub fn read(&self, slot: SwapSlot, page: &mut FrameBytes) -> Result<(), BlockError> {
        let mut device = self.device.lock();
        let first = Self::first_sector(slot);
        for (i, sector) in page.chunks_exact_mut(BLOCK_SECTOR_SIZE).enumerate() {
            device.read(first + i as BlockSector, sector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, RamDisk};
    use pagekern_shared::mem::PAGE_FRAME_SIZE;

    fn swap(slots: usize) -> SwapSpace {
        let sectors = (slots * SECTORS_PER_PAGE) as BlockSector;
        SwapSpace::new(RamDisk::block("swap", BlockType::Swap, sectors))
    }

    #[test]
    fn runs_of_slots() {
        let swap = swap(8);
        assert_eq!(swap.slot_capacity(), 8);
        assert_eq!(swap.allocate(3), Ok(0));
        assert_eq!(swap.allocate(3), Ok(3));
        // only 2 left
        assert_eq!(swap.allocate(3), Err(SwapError::NoSpace));
        swap.free(0, 3);
        assert_eq!(swap.allocate(3), Ok(0));
        assert_eq!(swap.free_slots(), 2);
    }

    #[test]
    fn first_fit_skips_short_holes() {
        let swap = swap(8);
        for _ in 0..8 {
            swap.allocate(1).unwrap();
        }
        swap.free(1, 1);
        swap.free(4, 2);
        assert_eq!(swap.allocate(2), Ok(4));
        assert_eq!(swap.allocate(1), Ok(1));
        assert_eq!(swap.allocate(0), Err(SwapError::NoSpace));
    }

    #[test]
    #[should_panic(expected = "freed while free")]
    fn double_free() {
        let swap = swap(4);
        let slot = swap.allocate(2).unwrap();
        swap.free(slot, 2);
        swap.free(slot, 1);
    }

    #[test]
    fn page_contents() {
        let swap = swap(4);
        let slot = swap.allocate(1).unwrap();
        let mut page = [0u8; PAGE_FRAME_SIZE];
        for (i, b) in page.iter_mut().enumerate() {
            *b = (i / BLOCK_SECTOR_SIZE) as u8 + 1;
        }
        swap.write(slot + 2, &page).unwrap();

        let mut back = [0u8; PAGE_FRAME_SIZE];
        swap.read(slot + 2, &mut back).unwrap();
        assert_eq!(back, page);
        swap.read(slot, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0));
        assert_eq!(swap.read(4, &mut back), Err(BlockError::SectorOutOfBounds));
    }
}
