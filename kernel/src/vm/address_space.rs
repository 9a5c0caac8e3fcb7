use super::spt::SupplementalPageTable;
use crate::paging::PageManager;
use crate::process::Pid;
use crate::sync::{Mutex, MutexGuard};
use core::sync::atomic::{AtomicUsize, Ordering};
use pagekern_shared::mem::USER_STACK;

/// The memory of one user process: its supplemental page table and the
/// hardware page table the MMU walks.
///
/// Tear a space down with [`Vm::kill_address_space`](super::Vm::kill_address_space)
/// before dropping it. Frames of a dropped space are reclaimed by eviction,
/// but swap slots of its pages are never freed.
pub struct AddressSpace {
    pid: Pid,
    pub(super) spt: Mutex<SupplementalPageTable>,
    pub(super) page_manager: Mutex<PageManager>,
    /// Lowest address of the stack pages allocated so far.
    stack_bottom: AtomicUsize,
    /// User stack pointer saved on entry to the kernel, for faults taken
    /// while the kernel touches user memory.
    user_stack_pointer: AtomicUsize,
}

impl AddressSpace {
    pub(super) fn new(pid: Pid) -> Self {
        Self {
            pid,
            spt: Mutex::new(SupplementalPageTable::new()),
            page_manager: Mutex::new(PageManager::new()),
            stack_bottom: AtomicUsize::new(USER_STACK),
            user_stack_pointer: AtomicUsize::new(USER_STACK),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn spt(&self) -> MutexGuard<'_, SupplementalPageTable> {
        self.spt.lock()
    }

    pub fn page_manager(&self) -> MutexGuard<'_, PageManager> {
        self.page_manager.lock()
    }

    pub fn stack_bottom(&self) -> usize {
        self.stack_bottom.load(Ordering::Acquire)
    }

    pub(super) fn lower_stack_bottom(&self, va: usize) {
        self.stack_bottom.fetch_min(va, Ordering::AcqRel);
    }

    pub(super) fn set_stack_bottom(&self, va: usize) {
        self.stack_bottom.store(va, Ordering::Release);
    }

    pub fn user_stack_pointer(&self) -> usize {
        self.user_stack_pointer.load(Ordering::Acquire)
    }

    /// Records the user stack pointer on entry to a system call.
    pub fn set_user_stack_pointer(&self, rsp: usize) {
        self.user_stack_pointer.store(rsp, Ordering::Release);
    }

    /// Number of pages currently in a frame.
    pub fn resident_pages(&self) -> usize {
        self.spt.lock().iter().filter(|page| page.is_resident()).count()
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let left = self.spt.get_mut().len();
        if left != 0 {
            log::warn!("address space {} dropped with {left} pages still in it", self.pid);
        }
    }
}
