//! Deferred initializers for pages that have not been touched yet.

use super::error::{Result, VmError};
use super::file::FilePage;
use super::page::{Backing, VmType};
use super::AnonPage;
use crate::fs::File;
use crate::mem::phys::FrameBytes;
use crate::process::Tid;

/// The part of an executable segment that fills one anonymous page.
#[derive(Debug)]
pub struct SegmentLoad {
    pub file: File,
    pub offset: usize,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

/// What a page becomes, and where its first contents come from, on first access.
#[derive(Debug)]
pub enum Initializer {
    /// An anonymous page that starts out zero-filled.
    Zeroed,
    /// An anonymous page that starts out with bytes from an executable.
    Segment(SegmentLoad),
    /// A page of a memory-mapped file.
    File(FilePage),
}

impl Initializer {
    pub fn target_type(&self) -> VmType {
        match self {
            Self::Zeroed | Self::Segment(_) => VmType::Anon,
            Self::File(_) => VmType::File,
        }
    }

    /// Fills a zeroed frame with the page's first contents.
    pub(super) fn load(&self, tid: Tid, frame: &mut FrameBytes) -> Result<()> {
        match self {
            Self::Zeroed => Ok(()),
            Self::Segment(segment) => {
                let _fs = segment
                    .file
                    .file_system()
                    .lock()
                    .lock_unless_held(tid);
                let read = segment
                    .file
                    .read_at(&mut frame[..segment.read_bytes], segment.offset)?;
                if read != segment.read_bytes {
                    return Err(VmError::ShortRead);
                }
                frame[segment.read_bytes..].fill(0);
                Ok(())
            }
            Self::File(file_page) => file_page.swap_in(tid, frame),
        }
    }

    pub(super) fn into_backing(self) -> Backing {
        match self {
            Self::Zeroed | Self::Segment(_) => Backing::Anon(AnonPage::default()),
            Self::File(file_page) => Backing::File(file_page),
        }
    }

    /// An equivalent initializer for a copy of the page in another address
    /// space. Segment pages get their own file handle; mapped pages share the
    /// parent's mapping.
    pub(super) fn duplicate(&self) -> Result<Self> {
        Ok(match self {
            Self::Zeroed => Self::Zeroed,
            Self::Segment(segment) => Self::Segment(SegmentLoad {
                file: segment.file.reopen()?,
                offset: segment.offset,
                read_bytes: segment.read_bytes,
                zero_bytes: segment.zero_bytes,
            }),
            Self::File(file_page) => Self::File(file_page.clone()),
        })
    }
}
