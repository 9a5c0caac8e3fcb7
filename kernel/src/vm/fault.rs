//! Page-fault resolution and the loader's entry points.

use super::error::{PageFault, Result, VmError};
use super::page::{Page, VmType};
use super::uninit::{Initializer, SegmentLoad};
use super::{AddressSpace, Vm};
use crate::fs::File;
use alloc::sync::Arc;
use core::cmp::min;
use pagekern_shared::mem::{is_kernel_vaddr, page_offset, page_round_down, PAGE_FRAME_SIZE, USER_STACK};

/// What the trap handler knows about the faulting access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultContext {
    /// The user stack pointer in the interrupt frame.
    pub stack_pointer: usize,
    /// Whether the access was made in user mode.
    pub user: bool,
}

impl FaultContext {
    pub fn user(stack_pointer: usize) -> Self {
        Self {
            stack_pointer,
            user: true,
        }
    }

    /// A fault taken while the kernel touches user memory; the stack pointer
    /// comes from the one saved on kernel entry.
    pub fn kernel() -> Self {
        Self {
            stack_pointer: 0,
            user: false,
        }
    }
}

impl Vm {
    /// Resolves a fault at `addr`. `Ok` means the access can be retried;
    /// every error is fatal to the faulting process.
    pub fn try_handle_fault(
        &self,
        space: &Arc<AddressSpace>,
        ctx: &FaultContext,
        addr: usize,
        user: bool,
        write: bool,
        not_present: bool,
    ) -> core::result::Result<(), PageFault> {
        let resolved = self.resolve(space, ctx, addr, user, write, not_present);
        if let Err(e) = resolved {
            log::debug!(
                "fault: pid {} {} {addr:#x} ({}): {e}",
                space.pid(),
                if write { "writing" } else { "reading" },
                if user { "user" } else { "kernel" },
            );
        }
        resolved
    }

    fn resolve(
        &self,
        space: &Arc<AddressSpace>,
        ctx: &FaultContext,
        addr: usize,
        user: bool,
        write: bool,
        not_present: bool,
    ) -> core::result::Result<(), PageFault> {
        if is_kernel_vaddr(addr) {
            return Err(PageFault::KernelAddress);
        }
        if !not_present {
            return Err(PageFault::WriteToReadOnly);
        }

        let va = page_round_down(addr);
        let writable = space.spt.lock().find(va).map(Page::is_writable);
        match writable {
            Some(false) if write => Err(PageFault::WriteToReadOnly),
            Some(_) => self.claim_page(space, va).map_err(PageFault::Load),
            None => {
                let rsp = if user {
                    ctx.stack_pointer
                } else {
                    space.user_stack_pointer()
                };
                if self.is_stack_access(addr, rsp) {
                    self.grow_stack(space, va).map_err(PageFault::Load)
                } else {
                    Err(PageFault::Unmapped)
                }
            }
        }
    }

    /// Inside the stack region and no further below `rsp` than a push reaches.
    fn is_stack_access(&self, addr: usize, rsp: usize) -> bool {
        (self.config.stack_floor()..USER_STACK).contains(&addr)
            && addr >= rsp.saturating_sub(self.config.stack_guard)
    }

    fn grow_stack(&self, space: &Arc<AddressSpace>, va: usize) -> Result<()> {
        // Losing a race to another fault on the same page is fine; the page
        // only needs to be resident afterwards.
        space.spt.lock().insert(Page::new_stack(va));
        self.claim_page(space, va)?;
        space.lower_stack_bottom(va);
        log::trace!("fault: pid {} stack grew to {va:#x}", space.pid());
        Ok(())
    }

    /// Maps the first stack page right below `USER_STACK` and returns the
    /// initial stack pointer.
    pub fn setup_stack(&self, space: &Arc<AddressSpace>) -> Result<usize> {
        let va = USER_STACK - PAGE_FRAME_SIZE;
        Self::insert_page(space, Page::new_stack(va))?;
        self.claim_page(space, va)?;
        space.set_stack_bottom(va);
        space.set_user_stack_pointer(USER_STACK);
        Ok(USER_STACK)
    }

    /// Registers the pages of an executable segment: `read_bytes` from `file`
    /// at `ofs` followed by `zero_bytes` zeros, mapped at `upage`. Nothing is
    /// read until the pages are touched.
    #[allow(clippy::too_many_arguments)]
    pub fn load_segment(
        &self,
        space: &AddressSpace,
        file: &File,
        mut ofs: usize,
        mut upage: usize,
        mut read_bytes: usize,
        mut zero_bytes: usize,
        writable: bool,
    ) -> Result<()> {
        if (read_bytes + zero_bytes) % PAGE_FRAME_SIZE != 0
            || page_offset(upage) != 0
            || page_offset(ofs) != 0
        {
            return Err(VmError::InvalidAddress);
        }

        while read_bytes > 0 || zero_bytes > 0 {
            let page_read_bytes = min(read_bytes, PAGE_FRAME_SIZE);
            let page_zero_bytes = PAGE_FRAME_SIZE - page_read_bytes;
            let init = Initializer::Segment(SegmentLoad {
                file: file.reopen()?,
                offset: ofs,
                read_bytes: page_read_bytes,
                zero_bytes: page_zero_bytes,
            });
            self.alloc_page_with_initializer(space, VmType::Anon, upage, writable, init)?;

            read_bytes -= page_read_bytes;
            zero_bytes -= page_zero_bytes;
            ofs += PAGE_FRAME_SIZE;
            upage += PAGE_FRAME_SIZE;
        }
        Ok(())
    }
}
