//! The pool of physical frames handed out to user pages.
//!
//! Frames are named by their kernel virtual address (kva). The pool owns the
//! frame contents; each frame's bytes sit behind their own lock, which is
//! always the innermost lock taken by the memory subsystem.

use super::placement::{Placement, Placer};
use super::AllocError;
use crate::sync::Mutex;
use alloc::{boxed::Box, vec::Vec};
use bitbybit::bitfield;
use pagekern_shared::mem::{phys_to_kva, PAGE_FRAME_SIZE, USER_POOL_BASE};

pub type FrameBytes = [u8; PAGE_FRAME_SIZE];

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    /// The frame's bytes are known to be all zero.
    #[bit(1, rw)]
    clean: bool,
}

struct PoolState {
    core_map: Box<[CoreMapEntry]>,
    placer: Placer,
    frames_allocated: usize,
}

pub struct UserPool {
    frames: Box<[Mutex<Box<FrameBytes>>]>,
    state: Mutex<PoolState>,
}

impl UserPool {
    pub fn new(frame_count: usize, placement: Placement) -> Self {
        let frames: Vec<_> = (0..frame_count)
            .map(|_| Mutex::new(Box::new([0; PAGE_FRAME_SIZE])))
            .collect();
        log::info!("user pool: {frame_count} frames, {placement:?} placement");
        Self {
            frames: frames.into_boxed_slice(),
            state: Mutex::new(PoolState {
                core_map: (0..frame_count)
                    .map(|_| CoreMapEntry::DEFAULT.with_clean(true))
                    .collect(),
                placer: Placer::new(placement),
                frames_allocated: 0,
            }),
        }
    }

    /// Takes one frame out of the pool and returns its kva. With `zeroed`,
    /// the frame's bytes are cleared before it is handed out.
    pub fn alloc(&self, zeroed: bool) -> Result<usize, AllocError> {
        let index = {
            let mut state = self.state.lock();
            let state = &mut *state;
            if state.frames_allocated == state.core_map.len() {
                return Err(AllocError);
            }
            let index = state.placer.place(&state.core_map, 1)?.start;
            let entry = state.core_map[index];
            assert!(!entry.allocated());
            state.core_map[index] = entry.with_allocated(true).with_clean(false);
            state.frames_allocated += 1;
            if !zeroed || entry.clean() {
                return Ok(Self::kva_of(index));
            }
            index
        };
        self.frames[index].lock().fill(0);
        Ok(Self::kva_of(index))
    }

    /// Returns a frame to the pool.
    pub fn free(&self, kva: usize) {
        let index = self.index_of(kva);
        let mut state = self.state.lock();
        assert!(
            state.core_map[index].allocated(),
            "freeing unallocated frame {kva:#x}"
        );
        state.core_map[index] = CoreMapEntry::DEFAULT;
        state.frames_allocated -= 1;
    }

    /// The bytes of the frame at `kva`.
    pub fn frame(&self, kva: usize) -> &Mutex<Box<FrameBytes>> {
        &self.frames[self.index_of(kva)]
    }

    pub fn contains(&self, kva: usize) -> bool {
        kva >= Self::kva_of(0) && kva < Self::kva_of(self.frames.len())
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn free_frames(&self) -> usize {
        let state = self.state.lock();
        state.core_map.len() - state.frames_allocated
    }

    fn kva_of(index: usize) -> usize {
        phys_to_kva(USER_POOL_BASE + index * PAGE_FRAME_SIZE)
    }

    fn index_of(&self, kva: usize) -> usize {
        assert!(
            self.contains(kva) && kva % PAGE_FRAME_SIZE == 0,
            "{kva:#x} is not a user frame"
        );
        (kva - Self::kva_of(0)) / PAGE_FRAME_SIZE
    }
}
