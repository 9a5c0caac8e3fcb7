//! The frame table: every user frame currently handed out, and which page
//! lives in it.
//!
//! Frames are kept in an arena and named by [`FrameId`]; pages refer to
//! their frame by id and frames refer back to their page by address space
//! and virtual address.

use super::AddressSpace;
use crate::swapping::page_replacement::{Clock, PageReplacementPolicy};
use alloc::{collections::BTreeMap, sync::Weak, vec::Vec};
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(usize);

/// Back-link from a frame to the page that occupies it.
#[derive(Clone)]
pub struct PageRef {
    pub space: Weak<AddressSpace>,
    pub va: usize,
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.space.upgrade() {
            Some(space) => write!(f, "<page pid={} va={:#x}>", space.pid(), self.va),
            None => write!(f, "<page of a dead space va={:#x}>", self.va),
        }
    }
}

#[derive(Debug)]
pub struct Frame {
    pub kva: usize,
    pub page: Option<PageRef>,
}

#[derive(Default)]
pub struct FrameTable {
    arena: Vec<Option<Frame>>,
    free_ids: Vec<usize>,
    by_kva: BTreeMap<usize, FrameId>,
    clock: Clock,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a frame. A frame with the same kva already present is returned
    /// as the error.
    pub fn insert(&mut self, frame: Frame) -> Result<FrameId, FrameId> {
        if let Some(&existing) = self.by_kva.get(&frame.kva) {
            return Err(existing);
        }
        let kva = frame.kva;
        let id = match self.free_ids.pop() {
            Some(index) => {
                self.arena[index] = Some(frame);
                FrameId(index)
            }
            None => {
                self.arena.push(Some(frame));
                FrameId(self.arena.len() - 1)
            }
        };
        self.by_kva.insert(kva, id);
        Ok(id)
    }

    pub fn find(&self, kva: usize) -> Option<FrameId> {
        self.by_kva.get(&kva).copied()
    }

    pub fn remove(&mut self, id: FrameId) -> Frame {
        let frame = self.arena[id.0]
            .take()
            .unwrap_or_else(|| panic!("{id:?} is not in the frame table"));
        self.by_kva.remove(&frame.kva);
        self.free_ids.push(id.0);
        frame
    }

    pub fn get(&self, id: FrameId) -> &Frame {
        self.arena[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("{id:?} is not in the frame table"))
    }

    pub fn lookup(&self, id: FrameId) -> Option<&Frame> {
        self.arena.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: FrameId) -> &mut Frame {
        self.arena[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("{id:?} is not in the frame table"))
    }

    /// Frames in ascending kva order.
    pub fn iter(&self) -> impl Iterator<Item = (FrameId, &Frame)> {
        self.by_kva.values().map(|&id| (id, self.get(id)))
    }

    pub fn len(&self) -> usize {
        self.by_kva.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kva.is_empty()
    }

    /// Runs the clock over every frame. `accessed` tests and clears the
    /// accessed bit of the page in a frame.
    pub fn select_victim(&mut self, mut accessed: impl FnMut(&Frame) -> bool) -> Option<FrameId> {
        let kvas: Vec<usize> = self.by_kva.keys().copied().collect();
        let (by_kva, arena) = (&self.by_kva, &self.arena);
        let frame_at = |kva: usize| arena[by_kva[&kva].0].as_ref();
        let kva = self
            .clock
            .select_victim(&kvas, |kva| frame_at(kva).is_some_and(&mut accessed))?;
        self.find(kva)
    }
}
