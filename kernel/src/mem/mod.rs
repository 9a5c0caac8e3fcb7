pub mod phys;
pub mod placement;
pub mod user;

use core::fmt;

/// No frames are left in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("out of user frames")
    }
}

impl core::error::Error for AllocError {}
