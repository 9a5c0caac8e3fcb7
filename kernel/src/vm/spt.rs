//! Supplemental page table: the per-process record of every user page,
//! resident or not.

use super::page::Page;
use alloc::collections::{btree_map::Entry, BTreeMap};
use core::ops::Range;
use pagekern_shared::mem::page_round_down;

#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<usize, Page>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The page containing `va`.
    pub fn find(&self, va: usize) -> Option<&Page> {
        self.pages.get(&page_round_down(va))
    }

    pub fn find_mut(&mut self, va: usize) -> Option<&mut Page> {
        self.pages.get_mut(&page_round_down(va))
    }

    /// Adds `page`. Returns `false`, leaving the table as it was, if a page
    /// with the same address is already present.
    pub fn insert(&mut self, page: Page) -> bool {
        match self.pages.entry(page.va()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(page);
                true
            }
        }
    }

    /// Detaches the page containing `va`. The caller releases what it holds.
    pub fn remove(&mut self, va: usize) -> Option<Page> {
        self.pages.remove(&page_round_down(va))
    }

    /// Whether any page starts inside `range`.
    pub fn overlaps(&self, range: Range<usize>) -> bool {
        self.pages.range(range).next().is_some()
    }

    /// Pages in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    pub fn addresses(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Detaches every page, leaving the table empty.
    pub(super) fn take_all(&mut self) -> BTreeMap<usize, Page> {
        core::mem::take(&mut self.pages)
    }
}
