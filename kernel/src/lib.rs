//! Demand-paged virtual memory for a small x86 kernel: frame table, swap,
//! anonymous and file-backed pages, `mmap`, and page-fault resolution, over
//! a FAT-style file store and block devices.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod config;
pub mod fs;
pub mod logger;
pub mod mem;
pub mod paging;
pub mod process;
pub mod swapping;
pub mod sync;
pub mod vm;

#[cfg(test)]
mod test_util;
