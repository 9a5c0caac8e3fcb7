//! Touching user memory the way a user program does.
//!
//! Each access walks the space's page table. A missing or read-only entry
//! raises a page fault, and the access is retried once the fault is resolved.
//! Successful accesses set the accessed bit, and writes set the dirty bit.

use crate::vm::{AddressSpace, FaultContext, PageFault, Vm};
use alloc::sync::Arc;
use core::cmp::min;
use core::ops::Range;
use pagekern_shared::mem::{page_offset, phys_to_kva, PAGE_FRAME_SIZE};

/// Copies `src` to user address `dst`.
pub fn copy_to_user(
    vm: &Vm,
    space: &Arc<AddressSpace>,
    ctx: &FaultContext,
    dst: usize,
    src: &[u8],
) -> Result<(), PageFault> {
    access(vm, space, ctx, dst, src.len(), true, |frame, range| {
        frame.copy_from_slice(&src[range]);
    })
}

/// Copies user memory at `src` into `dst`.
pub fn copy_from_user(
    vm: &Vm,
    space: &Arc<AddressSpace>,
    ctx: &FaultContext,
    src: usize,
    dst: &mut [u8],
) -> Result<(), PageFault> {
    access(vm, space, ctx, src, dst.len(), false, |frame, range| {
        dst[range].copy_from_slice(frame);
    })
}

/// Calls `f` with each piece of `len` bytes at `addr` that lies in a single
/// frame, along with the piece's range relative to `addr`.
fn access(
    vm: &Vm,
    space: &Arc<AddressSpace>,
    ctx: &FaultContext,
    addr: usize,
    len: usize,
    write: bool,
    mut f: impl FnMut(&mut [u8], Range<usize>),
) -> Result<(), PageFault> {
    let end = addr.checked_add(len).ok_or(PageFault::KernelAddress)?;
    let mut cur = addr;
    while cur < end {
        let offset = page_offset(cur);
        let chunk = min(end - cur, PAGE_FRAME_SIZE - offset);
        loop {
            let mut page_manager = space.page_manager();
            match page_manager.entry(cur) {
                Some(entry) if !write || entry.read_write() => {
                    page_manager.touch(cur, write);
                    let mut frame = vm.pool().frame(phys_to_kva(entry.frame_phys())).lock();
                    let done = cur - addr;
                    f(&mut frame[offset..offset + chunk], done..done + chunk);
                    break;
                }
                entry => {
                    drop(page_manager);
                    vm.try_handle_fault(space, ctx, cur, ctx.user, write, entry.is_none())?;
                }
            }
        }
        cur += chunk;
    }
    Ok(())
}
