//! Per-address-space hardware page tables.
//!
//! A [`PageManager`] is the two-level x86 table the MMU walks for one
//! process. Only present entries are ever stored, and second-level tables
//! are created on first use and dropped once empty.

use alloc::{boxed::Box, collections::BTreeMap};
use pagekern_shared::{
    mem::{is_user_vaddr, kva_to_phys, page_offset, phys_to_kva},
    paging::{PageTable, PageTableEntry, VirtualAddress},
};

#[derive(Default)]
pub struct PageManager {
    tables: BTreeMap<usize, Box<PageTable>>,
}

fn split(va: usize) -> (usize, usize) {
    let va = VirtualAddress::from(va);
    (
        va.page_directory_index().value() as usize,
        va.page_table_index().value() as usize,
    )
}

impl PageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps user page `upage` to the frame at `kva`. Returns `false` and
    /// changes nothing if `upage` is already mapped.
    pub fn map(&mut self, upage: usize, kva: usize, writable: bool) -> bool {
        debug_assert_eq!(page_offset(upage), 0);
        assert!(is_user_vaddr(upage), "mapping kernel address {upage:#x}");
        let (dir, idx) = split(upage);
        let table = self.tables.entry(dir).or_default();
        if table[idx].present() {
            return false;
        }
        table[idx] = PageTableEntry::user_page(kva_to_phys(kva), writable);
        true
    }

    /// Marks `upage` not present. Later accesses fault.
    pub fn unmap(&mut self, upage: usize) {
        let (dir, idx) = split(upage);
        if let Some(table) = self.tables.get_mut(&dir) {
            table[idx] = PageTableEntry::DEFAULT;
            if table.is_empty() {
                self.tables.remove(&dir);
            }
        }
    }

    pub fn entry(&self, va: usize) -> Option<PageTableEntry> {
        let (dir, idx) = split(va);
        let entry = self.tables.get(&dir)?[idx];
        entry.present().then_some(entry)
    }

    fn update(&mut self, va: usize, f: impl FnOnce(PageTableEntry) -> PageTableEntry) {
        let (dir, idx) = split(va);
        if let Some(entry) = self.tables.get_mut(&dir).map(|table| &mut table[idx]) {
            if entry.present() {
                *entry = f(*entry);
            }
        }
    }

    /// The kva of the frame `va` is mapped to, including `va`'s page offset.
    pub fn translate(&self, va: usize) -> Option<usize> {
        self.entry(va)
            .map(|entry| phys_to_kva(entry.frame_phys()) + page_offset(va))
    }

    pub fn is_writable(&self, va: usize) -> bool {
        self.entry(va).is_some_and(|entry| entry.read_write())
    }

    pub fn is_dirty(&self, va: usize) -> bool {
        self.entry(va).is_some_and(|entry| entry.dirty())
    }

    pub fn set_dirty(&mut self, va: usize, dirty: bool) {
        self.update(va, |entry| entry.with_dirty(dirty));
    }

    pub fn is_accessed(&self, va: usize) -> bool {
        self.entry(va).is_some_and(|entry| entry.accessed())
    }

    pub fn set_accessed(&mut self, va: usize, accessed: bool) {
        self.update(va, |entry| entry.with_accessed(accessed));
    }

    /// Records an access the way the MMU does: sets the accessed bit, and the
    /// dirty bit for writes.
    pub fn touch(&mut self, va: usize, write: bool) {
        self.update(va, |entry| entry.with_accessed(true).with_dirty(entry.dirty() || write));
    }

    pub fn mapped_pages(&self) -> usize {
        self.tables
            .values()
            .map(|table| table.iter().filter(|e| e.present()).count())
            .sum()
    }
}
