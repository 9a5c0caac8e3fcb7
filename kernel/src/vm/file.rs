//! Memory-mapped files.
//!
//! Each `mmap` call creates one [`Mapping`] holding its own handle to the
//! file. Every page of the mapping shares it through an `Arc`, so the file is
//! closed when the last page referring to it goes away.

use super::error::{Result, VmError};
use super::page::Page;
use super::uninit::Initializer;
use super::{AddressSpace, Vm};
use crate::fs::File;
use crate::mem::phys::FrameBytes;
use crate::paging::PageManager;
use crate::process::Tid;
use alloc::sync::Arc;
use core::cmp::min;
use core::sync::atomic::Ordering;
use pagekern_shared::mem::{page_offset, OFFSET, PAGE_FRAME_SIZE};

#[derive(Debug)]
pub struct Mapping {
    id: usize,
    base: usize,
    length: usize,
    file: File,
}

/// One page of a mapping: `read_bytes` from the file at `offset`, then
/// `zero_bytes` of zeros.
#[derive(Debug, Clone)]
pub struct FilePage {
    mapping: Arc<Mapping>,
    offset: usize,
    read_bytes: usize,
    zero_bytes: usize,
}

impl FilePage {
    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    pub fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    pub fn zero_bytes(&self) -> usize {
        self.zero_bytes
    }

    pub(super) fn swap_in(&self, tid: Tid, frame: &mut FrameBytes) -> Result<()> {
        let file = &self.mapping.file;
        let _fs = file.file_system().lock().lock_unless_held(tid);
        let read = file.read_at(&mut frame[..self.read_bytes], self.offset)?;
        if read != self.read_bytes {
            return Err(VmError::ShortRead);
        }
        frame[self.read_bytes..].fill(0);
        Ok(())
    }

    /// Stores the page's file bytes if the page was written, and clears its
    /// dirty bit.
    pub(super) fn write_back(
        &self,
        va: usize,
        tid: Tid,
        frame: &FrameBytes,
        page_manager: &mut PageManager,
    ) -> Result<()> {
        if !page_manager.is_dirty(va) {
            return Ok(());
        }
        let file = &self.mapping.file;
        let _fs = file.file_system().lock().lock_unless_held(tid);
        let written = file.write_at(&frame[..self.read_bytes], self.offset)?;
        if written != self.read_bytes {
            return Err(VmError::ShortWrite);
        }
        page_manager.set_dirty(va, false);
        log::trace!("mmap: wrote back {va:#x} at offset {}", self.offset);
        Ok(())
    }

    pub(super) fn swap_out(
        &self,
        va: usize,
        tid: Tid,
        frame: &FrameBytes,
        page_manager: &mut PageManager,
    ) -> Result<()> {
        self.write_back(va, tid, frame, page_manager)?;
        page_manager.unmap(va);
        Ok(())
    }
}

impl Vm {
    /// Maps `length` bytes of `file`, starting at `offset`, at `addr`. Pages
    /// are loaded on first access; bytes past the end of the file read as
    /// zero. Returns `addr`.
    pub fn mmap(
        &self,
        space: &AddressSpace,
        addr: usize,
        length: usize,
        writable: bool,
        file: &File,
        offset: usize,
    ) -> Result<usize> {
        if addr == 0 || page_offset(addr) != 0 || page_offset(offset) != 0 || length == 0 {
            return Err(VmError::InvalidAddress);
        }
        let end = length
            .checked_next_multiple_of(PAGE_FRAME_SIZE)
            .and_then(|len| addr.checked_add(len))
            .filter(|&end| end <= OFFSET)
            .ok_or(VmError::InvalidAddress)?;
        let _fs = self.fs_guard(space.pid());
        let file_length = file.length()?;
        if file_length == 0 {
            return Err(VmError::EmptyFile);
        }

        let mut spt = space.spt.lock();
        if spt.overlaps(addr..end) {
            return Err(VmError::AlreadyMapped);
        }
        let mapping = Arc::new(Mapping {
            id: self.next_mapping.fetch_add(1, Ordering::Relaxed),
            base: addr,
            length,
            file: file.reopen()?,
        });

        let mut remaining = file_length.saturating_sub(offset);
        for (i, va) in (addr..end).step_by(PAGE_FRAME_SIZE).enumerate() {
            let read_bytes = min(remaining, PAGE_FRAME_SIZE);
            remaining -= read_bytes;
            let file_page = FilePage {
                mapping: mapping.clone(),
                offset: offset + i * PAGE_FRAME_SIZE,
                read_bytes,
                zero_bytes: PAGE_FRAME_SIZE - read_bytes,
            };
            let inserted = spt.insert(Page::new(va, writable, Initializer::File(file_page)));
            debug_assert!(inserted);
        }
        log::debug!(
            "mmap: pid {} mapped inode {} at {addr:#x}..{end:#x} (mapping {})",
            space.pid(),
            file.inode(),
            mapping.id
        );
        Ok(addr)
    }

    /// Unmaps the mapping that starts at `addr`, writing dirty pages back to
    /// the file.
    pub fn munmap(&self, space: &AddressSpace, addr: usize) -> Result<()> {
        let tid = space.pid();
        let _fs = self.fs_guard(tid);
        let mut frames = self.frames.lock();
        let mut spt = space.spt.lock();

        let mapping = spt
            .find(addr)
            .and_then(Page::mapping)
            .filter(|mapping| mapping.base == addr)
            .cloned()
            .ok_or(VmError::NotMapped)?;

        let end = addr + mapping.length.next_multiple_of(PAGE_FRAME_SIZE);
        let mut result = Ok(());
        for va in (addr..end).step_by(PAGE_FRAME_SIZE) {
            let ours = spt
                .find(va)
                .and_then(Page::mapping)
                .is_some_and(|m| Arc::ptr_eq(m, &mapping));
            if !ours {
                continue;
            }
            if let Some(page) = spt.remove(va) {
                let destroyed = self.destroy_page(&mut frames, tid, space, page);
                if result.is_ok() {
                    result = destroyed;
                }
            }
        }
        log::debug!(
            "munmap: pid {} unmapped {addr:#x}..{end:#x} (mapping {})",
            space.pid(),
            mapping.id
        );
        result
    }
}
