// https://wiki.osdev.org/Paging

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation for the user half of a 32-bit address space, which is all a page
// table entry ever describes.
#![allow(clippy::cast_possible_truncation)]

use crate::mem::PAGE_FRAME_SIZE;
use arbitrary_int::{u10, u12, u20};
use bitbybit::bitfield;
use core::{
    mem::size_of,
    ops::{Deref, DerefMut},
};

pub const PAGE_TABLE_LEN: usize = PAGE_FRAME_SIZE / size_of::<PageTableEntry>();

/// One second-level table: 1024 entries covering 4MB of virtual memory.
#[repr(align(4096))]
pub struct PageTable(pub [PageTableEntry; PAGE_TABLE_LEN]);

impl PageTable {
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|entry| !entry.present())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self([PageTableEntry::DEFAULT; PAGE_TABLE_LEN])
    }
}

impl Deref for PageTable {
    type Target = [PageTableEntry; PAGE_TABLE_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PageTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A present user entry pointing at the frame with physical address `phys`.
    pub fn user_page(phys: usize, writable: bool) -> Self {
        debug_assert_eq!(phys % PAGE_FRAME_SIZE, 0);
        Self::DEFAULT
            .with_present(true)
            .with_user_supervisor(true)
            .with_read_write(writable)
            .with_page_frame_address(u20::new((phys / PAGE_FRAME_SIZE) as u32))
    }

    /// Physical address of the frame this entry points at.
    pub fn frame_phys(&self) -> usize {
        self.page_frame_address().value() as usize * PAGE_FRAME_SIZE
    }
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(22..=31, r)]
    page_directory_index: u10,
    #[bits(12..=21, r)]
    page_table_index: u10,
    #[bits(0..=11, r)]
    offset: u12,
}

impl From<usize> for VirtualAddress {
    fn from(addr: usize) -> Self {
        Self::new_with_raw_value(addr as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_layout() {
        let entry = PageTableEntry::user_page(0x0123_4000, true);
        assert!(entry.present());
        assert!(entry.read_write());
        assert!(!entry.dirty());
        assert_eq!(entry.frame_phys(), 0x0123_4000);
        assert_eq!(entry.raw_value() & 0xfff, 0b111);
    }

    #[test]
    fn address_split() {
        let va = VirtualAddress::from(0x1040_3abc);
        assert_eq!(va.page_directory_index().value(), 0x41);
        assert_eq!(va.page_table_index().value(), 0x3);
        assert_eq!(va.offset().value(), 0xabc);
    }
}
