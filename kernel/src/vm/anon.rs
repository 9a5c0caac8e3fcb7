//! Anonymous pages: no file behind them, so eviction goes to swap.

use super::error::Result;
use crate::mem::phys::FrameBytes;
use crate::paging::PageManager;
use crate::swapping::{SwapSlot, SwapSpace};

#[derive(Debug, Default)]
pub struct AnonPage {
    /// Where the contents are while the page is swapped out.
    slot: Option<SwapSlot>,
}

impl AnonPage {
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        self.slot
    }

    /// Brings the page back from its slot and frees the slot. A page that was
    /// never swapped out keeps the zeroed frame it was given.
    pub(super) fn swap_in(&mut self, swap: &SwapSpace, frame: &mut FrameBytes) -> Result<()> {
        if let Some(slot) = self.slot {
            swap.read(slot, frame)?;
            swap.free(slot, 1);
            self.slot = None;
            log::trace!("anon: swapped in from slot {slot}");
        }
        Ok(())
    }

    /// Writes the page to a fresh slot and unmaps it.
    ///
    /// # Panics
    ///
    /// Panics when swap is full.
    pub(super) fn swap_out(
        &mut self,
        va: usize,
        swap: &SwapSpace,
        frame: &FrameBytes,
        page_manager: &mut PageManager,
    ) -> Result<()> {
        debug_assert!(self.slot.is_none());
        let slot = swap
            .allocate(1)
            .unwrap_or_else(|e| panic!("evicting {va:#x}: {e}"));
        if let Err(e) = swap.write(slot, frame) {
            swap.free(slot, 1);
            return Err(e.into());
        }
        self.slot = Some(slot);
        page_manager.unmap(va);
        log::trace!("anon: swapped {va:#x} out to slot {slot}");
        Ok(())
    }

    pub(super) fn destroy(&mut self, swap: &SwapSpace) {
        if let Some(slot) = self.slot.take() {
            swap.free(slot, 1);
        }
    }
}
