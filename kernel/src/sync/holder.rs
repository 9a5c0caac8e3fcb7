//! A lock that remembers which thread holds it.
//!
//! The file-system lock is one of these. Lazy loading of a file-backed page
//! can happen while the faulting thread is already inside a file-system
//! operation, so callers check [`HolderLock::held_by`] (or use
//! [`HolderLock::lock_unless_held`]) instead of acquiring twice.

use super::mutex::{Mutex, MutexGuard};
use crate::process::{AtomicTid, Tid};
use core::sync::atomic::Ordering;

const NO_HOLDER: Tid = 0;

pub struct HolderLock {
    holder: AtomicTid,
    inner: Mutex<()>,
}

pub struct HolderLockGuard<'a> {
    lock: &'a HolderLock,
    _inner: MutexGuard<'a, ()>,
}

impl HolderLock {
    pub const fn new() -> Self {
        Self {
            holder: AtomicTid::new(NO_HOLDER),
            inner: Mutex::new(()),
        }
    }

    pub fn lock(&self, tid: Tid) -> HolderLockGuard<'_> {
        debug_assert_ne!(tid, NO_HOLDER);
        assert!(!self.held_by(tid), "thread {tid} acquired a lock it already holds");
        let inner = self.inner.lock();
        self.holder.store(tid, Ordering::Release);
        HolderLockGuard {
            lock: self,
            _inner: inner,
        }
    }

    /// Acquires the lock unless `tid` already holds it, in which case the
    /// existing acquisition covers the caller and `None` is returned.
    pub fn lock_unless_held(&self, tid: Tid) -> Option<HolderLockGuard<'_>> {
        if self.held_by(tid) {
            None
        } else {
            Some(self.lock(tid))
        }
    }

    pub fn held_by(&self, tid: Tid) -> bool {
        self.holder.load(Ordering::Acquire) == tid
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl Default for HolderLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HolderLockGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_inner` is dropped, so the holder is cleared while the
        // lock is still owned.
        self.lock.holder.store(NO_HOLDER, Ordering::Release);
    }
}
