//! Process identifiers as seen by the memory subsystem.
//!
//! Every user process runs on exactly one thread, so a process id doubles as
//! the id of the thread that faults on its pages and acquires locks on its
//! behalf.

use core::sync::atomic::{AtomicU16, Ordering};

pub type Pid = u16;
pub type Tid = Pid;
pub type AtomicPid = AtomicU16;
pub type AtomicTid = AtomicU16;

/// Hands out process ids, starting at 1. Id 0 means "nobody".
pub struct PidAllocator {
    next_pid: AtomicPid,
}

impl PidAllocator {
    pub const fn new() -> Self {
        Self {
            next_pid: AtomicPid::new(1),
        }
    }

    pub fn allocate(&self) -> Pid {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        if pid == 0 {
            panic!("PID overflow");
        }
        pid
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}
