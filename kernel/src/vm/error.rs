use crate::block::BlockError;
use crate::fs;
use crate::mem::AllocError;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// a page already covers the address
    AlreadyMapped,
    /// no page covers the address
    NotMapped,
    /// the address or range is unusable (null, unaligned, or in kernel space)
    InvalidAddress,
    /// the initializer does not produce the requested page type
    InvalidInitializer,
    /// no frame could be found, not even by eviction
    OutOfFrames,
    /// mapping a file with nothing in it
    EmptyFile,
    /// a file ended before the bytes a page needs
    ShortRead,
    /// a write-back stored fewer bytes than the page holds
    ShortWrite,
    File(fs::Error),
    Block(BlockError),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyMapped => write!(f, "address already mapped"),
            Self::NotMapped => write!(f, "address not mapped"),
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::InvalidInitializer => write!(f, "initializer does not match page type"),
            Self::OutOfFrames => write!(f, "out of frames"),
            Self::EmptyFile => write!(f, "cannot map an empty file"),
            Self::ShortRead => write!(f, "short read while loading a page"),
            Self::ShortWrite => write!(f, "short write while writing back a page"),
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Block(e) => write!(f, "swap device error: {e}"),
        }
    }
}

impl core::error::Error for VmError {}

impl From<fs::Error> for VmError {
    fn from(e: fs::Error) -> Self {
        Self::File(e)
    }
}

impl From<BlockError> for VmError {
    fn from(e: BlockError) -> Self {
        Self::Block(e)
    }
}

impl From<AllocError> for VmError {
    fn from(_: AllocError) -> Self {
        Self::OutOfFrames
    }
}

pub type Result<T> = core::result::Result<T, VmError>;

/// Why a page fault could not be resolved. Each of these kills the faulting
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFault {
    /// user access to a kernel address
    KernelAddress,
    /// write to a read-only page, or a protection fault on a present page
    WriteToReadOnly,
    /// no page covers the address and it is not a stack access
    Unmapped,
    /// the page exists but could not be brought in
    Load(VmError),
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelAddress => write!(f, "access to kernel address"),
            Self::WriteToReadOnly => write!(f, "write to read-only page"),
            Self::Unmapped => write!(f, "access to unmapped address"),
            Self::Load(e) => write!(f, "page load failed: {e}"),
        }
    }
}

impl core::error::Error for PageFault {}
