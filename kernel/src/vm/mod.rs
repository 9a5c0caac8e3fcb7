//! Demand-paged virtual memory.
//!
//! [`Vm`] owns the user frame pool, the frame table and the swap space, and
//! resolves page faults against each process's supplemental page table.
//!
//! Locks are taken in this order, outermost first: the file-system lock, the
//! frame table, the supplemental page table of a space, the page manager of a
//! space, the bytes of one frame. Anything that can allocate, release or
//! evict frames takes the file-system lock (unless the acting thread already
//! holds it) and then the frame table. The supplemental page table is never
//! held while a frame is acquired, since eviction locks the victim's table.

mod address_space;
pub mod anon;
pub mod error;
pub mod fault;
pub mod file;
pub mod frame;
pub mod page;
pub mod spt;
pub mod uninit;

pub use address_space::AddressSpace;
pub use anon::AnonPage;
pub use error::{PageFault, Result, VmError};
pub use fault::FaultContext;
pub use file::{FilePage, Mapping};
pub use frame::{Frame, FrameId, FrameTable, PageRef};
pub use page::{Backing, Page, VmType};
pub use spt::SupplementalPageTable;
pub use uninit::{Initializer, SegmentLoad};

use crate::block::Block;
use crate::config::VmConfig;
use crate::fs::FileSystem;
use crate::logger;
use crate::mem::phys::{FrameBytes, UserPool};
use crate::process::{Pid, PidAllocator, Tid};
use crate::swapping::SwapSpace;
use crate::sync::{HolderLockGuard, Mutex};
use alloc::{
    boxed::Box,
    collections::BTreeMap,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::AtomicUsize;
use pagekern_shared::mem::{is_user_vaddr, page_round_down, PAGE_FRAME_SIZE};

pub struct Vm {
    config: VmConfig,
    pool: UserPool,
    frames: Mutex<FrameTable>,
    swap: SwapSpace,
    fs: Arc<FileSystem>,
    pids: PidAllocator,
    spaces: Mutex<BTreeMap<Pid, Weak<AddressSpace>>>,
    next_mapping: AtomicUsize,
}

impl Vm {
    pub fn new(config: VmConfig, swap_device: Block, fs: Arc<FileSystem>) -> Self {
        logger::init(config.log_level);
        log::info!("vm: {config:?}");
        Self {
            pool: UserPool::new(config.user_frames, config.placement),
            frames: Mutex::new(FrameTable::new()),
            swap: SwapSpace::new(swap_device),
            fs,
            pids: PidAllocator::new(),
            spaces: Mutex::new(BTreeMap::new()),
            next_mapping: AtomicUsize::new(1),
            config,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn file_system(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    pub fn pool(&self) -> &UserPool {
        &self.pool
    }

    /// Number of frames in the frame table.
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// A new, empty address space with a fresh pid. It must be handed to
    /// [`Vm::kill_address_space`] before it is dropped.
    pub fn create_address_space(&self) -> Arc<AddressSpace> {
        let space = Arc::new(AddressSpace::new(self.pids.allocate()));
        let mut spaces = self.spaces.lock();
        spaces.retain(|_, weak| weak.strong_count() > 0);
        spaces.insert(space.pid(), Arc::downgrade(&space));
        drop(spaces);
        log::debug!("vm: created address space {}", space.pid());
        space
    }

    fn fs_guard(&self, tid: Tid) -> Option<HolderLockGuard<'_>> {
        self.fs.lock().lock_unless_held(tid)
    }

    /// Registers a lazily allocated page of `vm_type` at `va`. Anonymous
    /// pages start zero-filled.
    pub fn alloc_page(
        &self,
        space: &AddressSpace,
        vm_type: VmType,
        va: usize,
        writable: bool,
    ) -> Result<()> {
        self.alloc_page_with_initializer(space, vm_type, va, writable, Initializer::Zeroed)
    }

    /// Registers a lazily allocated page at `va` whose first contents come
    /// from `init`. `init` must produce a page of `vm_type`.
    pub fn alloc_page_with_initializer(
        &self,
        space: &AddressSpace,
        vm_type: VmType,
        va: usize,
        writable: bool,
        init: Initializer,
    ) -> Result<()> {
        if vm_type == VmType::Uninit || init.target_type() != vm_type {
            return Err(VmError::InvalidInitializer);
        }
        let va = page_round_down(va);
        Self::insert_page(space, Page::new(va, writable, init))
    }

    fn insert_page(space: &AddressSpace, page: Page) -> Result<()> {
        if page.va() == 0 || !is_user_vaddr(page.va()) {
            return Err(VmError::InvalidAddress);
        }
        if space.spt.lock().insert(page) {
            Ok(())
        } else {
            Err(VmError::AlreadyMapped)
        }
    }

    /// Makes the page at `va` resident. Already resident pages are left alone.
    pub fn claim_page(&self, space: &Arc<AddressSpace>, va: usize) -> Result<()> {
        let tid = space.pid();
        let _fs = self.fs_guard(tid);
        let mut frames = self.frames.lock();
        self.do_claim_page(&mut frames, tid, space, page_round_down(va))
    }

    fn do_claim_page(
        &self,
        frames: &mut FrameTable,
        tid: Tid,
        space: &Arc<AddressSpace>,
        va: usize,
    ) -> Result<()> {
        match space.spt.lock().find(va) {
            None => return Err(VmError::NotMapped),
            Some(page) if page.is_resident() => return Ok(()),
            Some(_) => {}
        }

        let id = self.get_frame(frames, tid)?;
        let kva = frames.get(id).kva;
        let mut spt = space.spt.lock();
        let Some(page) = spt.find_mut(va) else {
            self.release_frame(frames, id);
            return Err(VmError::NotMapped);
        };

        let loaded = {
            let mut bytes = self.pool.frame(kva).lock();
            page.backing.swap_in(&self.swap, tid, &mut bytes)
        };
        if let Err(e) = loaded {
            self.release_frame(frames, id);
            return Err(e);
        }
        if !space.page_manager.lock().map(va, kva, page.writable) {
            self.release_frame(frames, id);
            return Err(VmError::AlreadyMapped);
        }
        page.frame = Some(id);
        frames.get_mut(id).page = Some(PageRef {
            space: Arc::downgrade(space),
            va,
        });
        log::trace!("vm: pid {} {va:#x} -> frame {kva:#x}", space.pid());
        Ok(())
    }

    /// A zeroed frame with no page in it, evicting one if the pool is empty.
    fn get_frame(&self, frames: &mut FrameTable, tid: Tid) -> Result<FrameId> {
        match self.pool.alloc(true) {
            Ok(kva) => Ok(frames
                .insert(Frame { kva, page: None })
                .unwrap_or_else(|id| panic!("frame {kva:#x} is already in the frame table as {id:?}"))),
            Err(_) => self.evict_frame(frames, tid),
        }
    }

    /// Picks a victim with the clock, moves its page out, and returns the
    /// frame zeroed and free of any page.
    fn evict_frame(&self, frames: &mut FrameTable, tid: Tid) -> Result<FrameId> {
        let id = frames
            .select_victim(|frame| {
                let Some(page_ref) = &frame.page else {
                    return false;
                };
                let Some(space) = page_ref.space.upgrade() else {
                    return false;
                };
                let mut page_manager = space.page_manager.lock();
                let accessed = page_manager.is_accessed(page_ref.va);
                page_manager.set_accessed(page_ref.va, false);
                accessed
            })
            .ok_or(VmError::OutOfFrames)?;

        let kva = frames.get(id).kva;
        if let Some(page_ref) = frames.get_mut(id).page.take() {
            if let Some(space) = page_ref.space.upgrade() {
                if let Err(e) = self.swap_out_page(tid, &space, id, kva, page_ref.va) {
                    frames.get_mut(id).page = Some(page_ref);
                    return Err(e);
                }
                log::debug!(
                    "vm: evicted pid {} {:#x} from frame {kva:#x}",
                    space.pid(),
                    page_ref.va
                );
            }
        }
        self.pool.frame(kva).lock().fill(0);
        Ok(id)
    }

    fn swap_out_page(
        &self,
        tid: Tid,
        space: &AddressSpace,
        id: FrameId,
        kva: usize,
        va: usize,
    ) -> Result<()> {
        let mut spt = space.spt.lock();
        let page = spt
            .find_mut(va)
            .filter(|page| page.frame == Some(id))
            .unwrap_or_else(|| panic!("frame {kva:#x} links to {va:#x}, which is not in it"));
        let mut page_manager = space.page_manager.lock();
        let bytes = self.pool.frame(kva).lock();
        page.backing
            .swap_out(va, &self.swap, tid, &bytes, &mut page_manager)?;
        page.frame = None;
        Ok(())
    }

    fn release_frame(&self, frames: &mut FrameTable, id: FrameId) {
        let frame = frames.remove(id);
        self.pool.free(frame.kva);
    }

    /// Removes the page at `va` and releases its frame, swap slot or file
    /// reference.
    pub fn spt_remove_page(&self, space: &AddressSpace, va: usize) -> Result<()> {
        let tid = space.pid();
        let _fs = self.fs_guard(tid);
        let mut frames = self.frames.lock();
        let page = space.spt.lock().remove(va).ok_or(VmError::NotMapped)?;
        self.destroy_page(&mut frames, tid, space, page)
    }

    /// Releases everything a detached page holds. Dirty mapped pages are
    /// written back first.
    fn destroy_page(
        &self,
        frames: &mut FrameTable,
        tid: Tid,
        space: &AddressSpace,
        mut page: Page,
    ) -> Result<()> {
        let mut page_manager = space.page_manager.lock();
        match page.frame.take() {
            Some(id) => {
                let kva = frames.get(id).kva;
                let destroyed = {
                    let bytes = self.pool.frame(kva).lock();
                    page.backing.destroy(
                        page.va,
                        &self.swap,
                        tid,
                        Some(&**bytes),
                        &mut page_manager,
                    )
                };
                page_manager.unmap(page.va);
                self.release_frame(frames, id);
                destroyed
            }
            None => page
                .backing
                .destroy(page.va, &self.swap, tid, None, &mut page_manager),
        }
    }

    /// Copies every page of `src` into the empty space `dst`.
    ///
    /// Anonymous pages are copied eagerly into frames of their own, mapped
    /// file pages are shared through the same mapping, and untouched pages
    /// stay untouched. On failure `dst` is left empty.
    pub fn copy_address_space(&self, dst: &Arc<AddressSpace>, src: &Arc<AddressSpace>) -> Result<()> {
        let tid = src.pid();
        let _fs = self.fs_guard(tid);
        let mut frames = self.frames.lock();
        if let Err(e) = self.copy_locked(&mut frames, tid, dst, src) {
            log::warn!("vm: copying {} into {} failed: {e}", src.pid(), dst.pid());
            if let Err(cleanup) = self.kill_locked(&mut frames, tid, dst) {
                log::warn!("vm: tearing down {} failed: {cleanup}", dst.pid());
            }
            return Err(e);
        }
        dst.set_stack_bottom(src.stack_bottom());
        dst.set_user_stack_pointer(src.user_stack_pointer());
        log::debug!("vm: copied {} into {}", src.pid(), dst.pid());
        Ok(())
    }

    fn copy_locked(
        &self,
        frames: &mut FrameTable,
        tid: Tid,
        dst: &Arc<AddressSpace>,
        src: &AddressSpace,
    ) -> Result<()> {
        let addresses: Vec<usize> = src.spt.lock().addresses().collect();
        for va in addresses {
            let (page, contents) = self.snapshot_page(frames, tid, src, va)?;
            if !dst.spt.lock().insert(page) {
                return Err(VmError::AlreadyMapped);
            }
            if let Some(contents) = contents {
                self.do_claim_page(frames, tid, dst, va)?;
                let id = dst
                    .spt
                    .lock()
                    .find(va)
                    .and_then(Page::frame)
                    .ok_or(VmError::NotMapped)?;
                **self.pool.frame(frames.get(id).kva).lock() = *contents;
            }
        }
        Ok(())
    }

    /// The child's copy of the page at `va`, and for anonymous pages the
    /// bytes it must start with.
    fn snapshot_page(
        &self,
        frames: &FrameTable,
        tid: Tid,
        src: &AddressSpace,
        va: usize,
    ) -> Result<(Page, Option<Box<FrameBytes>>)> {
        let spt = src.spt.lock();
        let page = spt.find(va).ok_or(VmError::NotMapped)?;
        let (backing, contents) = match &page.backing {
            Backing::Uninit(init) => (Backing::Uninit(init.duplicate()?), None),
            Backing::File(file_page) => {
                if let Some(id) = page.frame {
                    let mut page_manager = src.page_manager.lock();
                    let bytes = self.pool.frame(frames.get(id).kva).lock();
                    file_page.write_back(va, tid, &bytes, &mut page_manager)?;
                }
                (Backing::Uninit(Initializer::File(file_page.clone())), None)
            }
            Backing::Anon(anon) => {
                let mut contents = Box::new([0; PAGE_FRAME_SIZE]);
                match (page.frame, anon.swap_slot()) {
                    (Some(id), _) => *contents = **self.pool.frame(frames.get(id).kva).lock(),
                    (None, Some(slot)) => self.swap.read(slot, &mut contents)?,
                    (None, None) => {}
                }
                (Backing::Uninit(Initializer::Zeroed), Some(contents))
            }
        };
        let child = Page {
            va,
            writable: page.writable,
            stack: page.stack,
            frame: None,
            backing,
        };
        Ok((child, contents))
    }

    /// Destroys every page of `space`: dirty mapped pages are written back,
    /// and frames and swap slots go back to their pools.
    pub fn kill_address_space(&self, space: &AddressSpace) -> Result<()> {
        let tid = space.pid();
        let _fs = self.fs_guard(tid);
        let mut frames = self.frames.lock();
        let result = self.kill_locked(&mut frames, tid, space);
        self.spaces.lock().remove(&space.pid());
        log::debug!("vm: killed address space {}", space.pid());
        result
    }

    fn kill_locked(&self, frames: &mut FrameTable, tid: Tid, space: &AddressSpace) -> Result<()> {
        let pages = space.spt.lock().take_all();
        let mut result = Ok(());
        for page in pages.into_values() {
            let destroyed = self.destroy_page(frames, tid, space, page);
            if result.is_ok() {
                result = destroyed;
            }
        }
        result
    }

    /// Whether every frame and every resident page point at each other and
    /// the page tables agree with both.
    pub fn frame_links_consistent(&self) -> bool {
        let spaces: Vec<Arc<AddressSpace>> = self
            .spaces
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        let frames = self.frames.lock();

        for (id, frame) in frames.iter() {
            let Some(page_ref) = &frame.page else {
                return false;
            };
            let Some(space) = page_ref.space.upgrade() else {
                return false;
            };
            let spt = space.spt.lock();
            let linked = spt
                .find(page_ref.va)
                .is_some_and(|page| page.frame == Some(id));
            let mapped = space.page_manager.lock().translate(page_ref.va) == Some(frame.kva);
            if !linked || !mapped {
                return false;
            }
        }

        for space in &spaces {
            let spt = space.spt.lock();
            let page_manager = space.page_manager.lock();
            for page in spt.iter() {
                let consistent = match page.frame {
                    Some(id) => frames.lookup(id).is_some_and(|frame| {
                        frame.page.as_ref().is_some_and(|page_ref| {
                            page_ref.va == page.va
                                && core::ptr::eq(page_ref.space.as_ptr(), Arc::as_ptr(space))
                        })
                    }),
                    None => page_manager.translate(page.va).is_none(),
                };
                if !consistent {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{create_file, pattern, read, vm, write};
    use pagekern_shared::mem::OFFSET;
    use std::thread;

    const HEAP: usize = 0x2000_0000;
    const MMAP: usize = 0x1000_0000;

    fn heap(n: usize) -> usize {
        HEAP + n * PAGE_FRAME_SIZE
    }

    #[test]
    fn pages_are_lazy() {
        let vm = vm(4, 4);
        let space = vm.create_address_space();
        vm.alloc_page(&space, VmType::Anon, heap(0) + 12, true).unwrap();
        assert!(space.spt().find(heap(0)).is_some_and(|p| p.va() == heap(0)));
        assert_eq!(space.resident_pages(), 0);
        assert_eq!(vm.frame_count(), 0);

        assert_eq!(read(&vm, &space, heap(0), 16).unwrap(), [0; 16]);
        assert_eq!(space.resident_pages(), 1);
        assert_eq!(space.spt().find(heap(0)).unwrap().backing_type(), VmType::Anon);
        assert!(vm.frame_links_consistent());
    }

    #[test]
    fn rejects_bad_pages() {
        let vm = vm(4, 4);
        let space = vm.create_address_space();
        assert_eq!(
            vm.alloc_page(&space, VmType::Uninit, heap(0), true),
            Err(VmError::InvalidInitializer)
        );
        assert_eq!(
            vm.alloc_page(&space, VmType::File, heap(0), true),
            Err(VmError::InvalidInitializer)
        );
        assert_eq!(vm.alloc_page(&space, VmType::Anon, 0, true), Err(VmError::InvalidAddress));
        assert_eq!(
            vm.alloc_page(&space, VmType::Anon, OFFSET, true),
            Err(VmError::InvalidAddress)
        );
        vm.alloc_page(&space, VmType::Anon, heap(0), true).unwrap();
        assert_eq!(
            vm.alloc_page(&space, VmType::Anon, heap(0) + 1, false),
            Err(VmError::AlreadyMapped)
        );
        assert_eq!(vm.claim_page(&space, heap(1)), Err(VmError::NotMapped));
        assert_eq!(vm.spt_remove_page(&space, heap(1)), Err(VmError::NotMapped));
    }

    #[test]
    fn claim_is_idempotent() {
        let vm = vm(4, 4);
        let space = vm.create_address_space();
        vm.alloc_page(&space, VmType::Anon, heap(0), true).unwrap();
        vm.claim_page(&space, heap(0)).unwrap();
        let frame = space.spt().find(heap(0)).and_then(Page::frame);
        vm.claim_page(&space, heap(0)).unwrap();
        assert_eq!(space.spt().find(heap(0)).and_then(Page::frame), frame);
        assert_eq!(vm.pool().free_frames(), 3);
    }

    #[test]
    fn removing_pages_releases_them() {
        let vm = vm(1, 4);
        let space = vm.create_address_space();
        for n in 0..2 {
            vm.alloc_page(&space, VmType::Anon, heap(n), true).unwrap();
            write(&vm, &space, heap(n), b"data").unwrap();
        }
        // page 0 was pushed out to make room for page 1
        assert_eq!(vm.swap().free_slots(), 3);

        vm.spt_remove_page(&space, heap(0)).unwrap();
        assert_eq!(vm.swap().free_slots(), 4);
        vm.spt_remove_page(&space, heap(1)).unwrap();
        assert_eq!(vm.pool().free_frames(), 1);
        assert_eq!(vm.frame_count(), 0);
        assert!(space.page_manager().translate(heap(1)).is_none());
    }

    #[test]
    fn contents_survive_eviction() {
        let vm = vm(2, 16);
        let space = vm.create_address_space();
        for n in 0..6 {
            vm.alloc_page(&space, VmType::Anon, heap(n), true).unwrap();
            write(&vm, &space, heap(n), &pattern(n as u8, PAGE_FRAME_SIZE)).unwrap();
            assert!(vm.frame_links_consistent());
        }
        assert_eq!(vm.frame_count(), 2);
        assert_eq!(vm.swap().free_slots(), 12);

        for n in (0..6).rev() {
            assert_eq!(
                read(&vm, &space, heap(n), PAGE_FRAME_SIZE).unwrap(),
                pattern(n as u8, PAGE_FRAME_SIZE)
            );
            assert!(vm.frame_links_consistent());
        }
        // every slot is freed as its page comes back, then reused on eviction
        assert_eq!(vm.swap().free_slots(), 12);
        assert_eq!(vm.pool().free_frames(), 0);
    }

    #[test]
    fn access_straddling_pages() {
        let vm = vm(1, 4);
        let space = vm.create_address_space();
        vm.alloc_page(&space, VmType::Anon, heap(0), true).unwrap();
        vm.alloc_page(&space, VmType::Anon, heap(1), true).unwrap();
        let data = pattern(9, 100);
        write(&vm, &space, heap(1) - 50, &data).unwrap();
        assert_eq!(read(&vm, &space, heap(1) - 50, 100).unwrap(), data);
    }

    #[test]
    fn only_dirty_mapped_pages_are_written_back() {
        let vm = vm(1, 4);
        let space = vm.create_address_space();
        let inum = create_file(&vm, &pattern(1, PAGE_FRAME_SIZE));
        let file = vm.file_system().open(inum).unwrap();
        vm.mmap(&space, MMAP, PAGE_FRAME_SIZE, true, &file, 0).unwrap();
        vm.alloc_page(&space, VmType::Anon, heap(0), true).unwrap();

        read(&vm, &space, MMAP, 8).unwrap();
        let written = vm.file_system().sectors_written();
        write(&vm, &space, heap(0), b"anon").unwrap();
        assert!(!space.spt().find(MMAP).unwrap().is_resident());
        assert_eq!(vm.file_system().sectors_written(), written);

        write(&vm, &space, MMAP, b"dirty").unwrap();
        assert_eq!(vm.swap().free_slots(), 3);
        assert_eq!(vm.file_system().sectors_written(), written);
        assert_eq!(read(&vm, &space, heap(0), 4).unwrap(), b"anon");
        assert!(vm.file_system().sectors_written() > written);
        assert_eq!(vm.swap().free_slots(), 4);

        let mut back = [0; 8];
        file.read_at(&mut back, 0).unwrap();
        assert_eq!(&back[..5], b"dirty");
        assert_eq!(back[5..], pattern(1, 8)[5..]);
        assert_eq!(read(&vm, &space, MMAP, 5).unwrap(), b"dirty");
    }

    #[test]
    #[should_panic(expected = "swap space exhausted")]
    fn eviction_with_full_swap_panics() {
        let vm = vm(1, 1);
        let space = vm.create_address_space();
        for n in 0..3 {
            vm.alloc_page(&space, VmType::Anon, heap(n), true).unwrap();
            write(&vm, &space, heap(n), b"x").unwrap();
        }
    }

    #[test]
    fn fault_while_holding_the_file_system_lock() {
        let vm = vm(1, 4);
        let space = vm.create_address_space();
        let data = pattern(4, 3000);
        let file = vm.file_system().open(create_file(&vm, &data)).unwrap();
        vm.mmap(&space, MMAP, 3000, true, &file, 0).unwrap();
        vm.alloc_page(&space, VmType::Anon, heap(0), true).unwrap();
        write(&vm, &space, MMAP, b"xyz").unwrap();

        let fs = vm.file_system().clone();
        {
            // as a read system call would, copying into a user buffer
            let _guard = fs.lock().lock(space.pid());
            write(&vm, &space, heap(0), &data[..8]).unwrap();
            assert!(fs.lock().held_by(space.pid()));
            assert_eq!(read(&vm, &space, MMAP, 3).unwrap(), b"xyz");
        }
        assert!(!fs.lock().is_locked());
    }

    #[test]
    fn fork_copies_anonymous_pages() {
        let vm = vm(2, 16);
        let parent = vm.create_address_space();
        for n in 0..3 {
            vm.alloc_page(&parent, VmType::Anon, heap(n), true).unwrap();
            write(&vm, &parent, heap(n), &pattern(n as u8, PAGE_FRAME_SIZE)).unwrap();
        }
        vm.alloc_page(&parent, VmType::Anon, heap(3), false).unwrap();
        vm.setup_stack(&parent).unwrap();

        let child = vm.create_address_space();
        vm.copy_address_space(&child, &parent).unwrap();
        assert!(vm.frame_links_consistent());
        assert_eq!(child.spt().len(), parent.spt().len());
        assert_eq!(child.stack_bottom(), parent.stack_bottom());
        assert!(!child.spt().find(heap(3)).unwrap().is_writable());

        for n in 0..3 {
            assert_eq!(
                read(&vm, &child, heap(n), PAGE_FRAME_SIZE).unwrap(),
                pattern(n as u8, PAGE_FRAME_SIZE)
            );
        }
        write(&vm, &child, heap(0), b"child").unwrap();
        assert_eq!(read(&vm, &parent, heap(0), 5).unwrap(), pattern(0, 5));
        assert_eq!(read(&vm, &child, heap(0), 5).unwrap(), b"child");

        vm.kill_address_space(&child).unwrap();
        vm.kill_address_space(&parent).unwrap();
        assert_eq!(vm.swap().free_slots(), 16);
        assert_eq!(vm.pool().free_frames(), 2);
    }

    #[test]
    fn fork_shares_mappings() {
        let vm = vm(8, 8);
        let parent = vm.create_address_space();
        let inum = create_file(&vm, &pattern(2, 2 * PAGE_FRAME_SIZE));
        let file = vm.file_system().open(inum).unwrap();
        vm.mmap(&parent, MMAP, 2 * PAGE_FRAME_SIZE, true, &file, 0).unwrap();
        write(&vm, &parent, MMAP, b"shared").unwrap();
        let open = vm.file_system().open_count(inum);

        let child = vm.create_address_space();
        vm.copy_address_space(&child, &parent).unwrap();
        assert_eq!(vm.file_system().open_count(inum), open);
        {
            let spt = child.spt();
            let mapping = spt.find(MMAP).and_then(Page::mapping).unwrap();
            assert!(Arc::ptr_eq(
                mapping,
                parent.spt().find(MMAP).and_then(Page::mapping).unwrap()
            ));
            assert_eq!(Arc::strong_count(mapping), 4);
        }

        // the parent's dirty page reached the file before the copy
        let mut back = [0; 6];
        file.read_at(&mut back, 0).unwrap();
        assert_eq!(&back, b"shared");
        assert_eq!(read(&vm, &child, MMAP, 6).unwrap(), b"shared");

        vm.munmap(&child, MMAP).unwrap();
        assert_eq!(vm.file_system().open_count(inum), open);
        vm.munmap(&parent, MMAP).unwrap();
        assert_eq!(vm.file_system().open_count(inum), 1);
    }

    #[test]
    fn kill_releases_everything() {
        let vm = vm(2, 8);
        let space = vm.create_address_space();
        let data = pattern(6, 5000);
        let inum = create_file(&vm, &data);
        let file = vm.file_system().open(inum).unwrap();

        vm.setup_stack(&space).unwrap();
        vm.load_segment(&space, &file, 0, 0x0804_8000, 5000, 3192, false)
            .unwrap();
        vm.mmap(&space, MMAP, 5000, true, &file, 0).unwrap();
        write(&vm, &space, MMAP + PAGE_FRAME_SIZE, b"last").unwrap();
        for n in 0..3 {
            vm.alloc_page(&space, VmType::Anon, heap(n), true).unwrap();
            write(&vm, &space, heap(n), b"anon").unwrap();
        }
        read(&vm, &space, 0x0804_8000, 1).unwrap();
        assert!(vm.swap().free_slots() < 8);

        vm.kill_address_space(&space).unwrap();
        assert!(space.spt().is_empty());
        assert_eq!(space.page_manager().mapped_pages(), 0);
        assert_eq!(vm.frame_count(), 0);
        assert_eq!(vm.pool().free_frames(), 2);
        assert_eq!(vm.swap().free_slots(), 8);
        assert_eq!(vm.file_system().open_count(inum), 1);

        let mut back = [0; 4];
        file.read_at(&mut back, PAGE_FRAME_SIZE).unwrap();
        assert_eq!(&back, b"last");
        assert_eq!(file.length().unwrap(), 5000);
    }

    #[test]
    fn frames_of_dropped_spaces_are_reclaimed() {
        let vm = vm(1, 4);
        let gone = vm.create_address_space();
        vm.alloc_page(&gone, VmType::Anon, heap(0), true).unwrap();
        write(&vm, &gone, heap(0), b"gone").unwrap();
        drop(gone);
        assert_eq!(vm.pool().free_frames(), 0);

        let space = vm.create_address_space();
        vm.alloc_page(&space, VmType::Anon, heap(0), true).unwrap();
        assert_eq!(read(&vm, &space, heap(0), 4).unwrap(), [0; 4]);
        assert_eq!(vm.swap().free_slots(), 4);
        assert!(vm.frame_links_consistent());
    }

    #[test]
    fn dropped_spaces_are_forgotten() {
        let vm = vm(1, 4);
        let kept = vm.create_address_space();
        drop(vm.create_address_space());
        drop(vm.create_address_space());
        let last = vm.create_address_space();

        let pids: Vec<Pid> = vm.spaces.lock().keys().copied().collect();
        assert_eq!(pids, [kept.pid(), last.pid()]);
    }

    #[test]
    fn failed_copy_leaves_the_child_empty() {
        let vm = vm(2, 8);
        let parent = vm.create_address_space();
        for n in 0..2 {
            vm.alloc_page(&parent, VmType::Anon, heap(n), true).unwrap();
            write(&vm, &parent, heap(n), &pattern(n as u8 + 40, PAGE_FRAME_SIZE)).unwrap();
        }
        let child = vm.create_address_space();
        vm.alloc_page(&child, VmType::Anon, heap(1), true).unwrap();

        assert_eq!(vm.copy_address_space(&child, &parent), Err(VmError::AlreadyMapped));
        assert!(child.spt().is_empty());
        assert_eq!(child.resident_pages(), 0);

        let resident = parent.resident_pages();
        assert_eq!(vm.frame_count(), resident);
        assert_eq!(vm.pool().free_frames(), 2 - resident);
        assert_eq!(vm.swap().free_slots(), 8 - (2 - resident));
        assert!(vm.frame_links_consistent());

        for n in 0..2 {
            assert_eq!(
                read(&vm, &parent, heap(n), PAGE_FRAME_SIZE).unwrap(),
                pattern(n as u8 + 40, PAGE_FRAME_SIZE)
            );
        }
    }

    #[test]
    fn concurrent_faults() {
        let vm = Arc::new(vm(4, 64));
        let workers: Vec<_> = (0..2u8)
            .map(|worker| {
                let vm = vm.clone();
                thread::spawn(move || {
                    let space = vm.create_address_space();
                    for n in 0..6 {
                        vm.alloc_page(&space, VmType::Anon, heap(n), true).unwrap();
                    }
                    for round in 0..3u8 {
                        let seed = |n: usize| worker * 64 + round * 8 + n as u8;
                        for n in 0..6 {
                            write(&vm, &space, heap(n), &pattern(seed(n), PAGE_FRAME_SIZE)).unwrap();
                        }
                        for n in 0..6 {
                            assert_eq!(
                                read(&vm, &space, heap(n), PAGE_FRAME_SIZE).unwrap(),
                                pattern(seed(n), PAGE_FRAME_SIZE)
                            );
                        }
                    }
                    vm.kill_address_space(&space).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(vm.frame_links_consistent());
        assert_eq!(vm.pool().free_frames(), 4);
        assert_eq!(vm.swap().free_slots(), 64);
    }
}
