//! The spinning ticket lock used throughout the memory subsystem.
//!
//! This is the kernel's own ticket mutex carried forward and cut down to the
//! operations the VM needs. It guards the frame table, each address space's
//! page tables, every physical frame and the swap state.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

/// A first-come first-served spin lock. Waiters are admitted in the order
/// they drew their tickets.
pub struct Mutex<T: ?Sized> {
    issued: AtomicUsize,
    serving: AtomicUsize,
    data: UnsafeCell<T>,
}

/// Exclusive access to a [`Mutex`]'s value; releases the lock when dropped.
pub struct MutexGuard<'a, T: ?Sized> {
    lock: &'a Mutex<T>,
}

unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            issued: AtomicUsize::new(0),
            serving: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Spins until this caller's ticket comes up.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let ticket = self.issued.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            spin_loop();
        }
        MutexGuard { lock: self }
    }

    /// Whether some ticket is outstanding. Only a hint once it returns.
    pub fn is_locked(&self) -> bool {
        self.issued.load(Ordering::Relaxed) != self.serving.load(Ordering::Relaxed)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while its ticket is being served.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref`, and `&mut self` rules out other borrows.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Only the holder advances `serving`.
        self.lock.serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use std::thread;

    #[test]
    fn guard_releases_on_drop() {
        let lock = Mutex::new(0);
        *lock.lock() = 1;
        assert_eq!(*lock.lock(), 1);

        let guard = lock.lock();
        assert!(lock.is_locked());
        drop(guard);
        assert!(!lock.is_locked());
        assert_eq!(lock.into_inner(), 1);
    }

    #[test]
    fn counts_across_threads() {
        let counter = Arc::new(Mutex::new(0usize));
        let workers: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*counter.lock(), 4000);
    }
}
