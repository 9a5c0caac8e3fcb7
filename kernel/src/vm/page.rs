use super::anon::AnonPage;
use super::error::Result;
use super::file::{FilePage, Mapping};
use super::frame::FrameId;
use super::uninit::Initializer;
use crate::mem::phys::FrameBytes;
use crate::paging::PageManager;
use crate::process::Tid;
use crate::swapping::SwapSpace;
use alloc::sync::Arc;
use pagekern_shared::mem::page_offset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmType {
    Uninit,
    Anon,
    File,
}

/// Where a page's contents live and how to move them.
#[derive(Debug)]
pub enum Backing {
    /// Not touched yet.
    Uninit(Initializer),
    Anon(AnonPage),
    File(FilePage),
}

/// One user virtual page.
#[derive(Debug)]
pub struct Page {
    pub(super) va: usize,
    pub(super) writable: bool,
    pub(super) stack: bool,
    pub(super) frame: Option<FrameId>,
    pub(super) backing: Backing,
}

impl Page {
    pub fn new(va: usize, writable: bool, initializer: Initializer) -> Self {
        debug_assert_eq!(page_offset(va), 0);
        Self {
            va,
            writable,
            stack: false,
            frame: None,
            backing: Backing::Uninit(initializer),
        }
    }

    pub(super) fn new_stack(va: usize) -> Self {
        Self {
            stack: true,
            ..Self::new(va, true, Initializer::Zeroed)
        }
    }

    pub fn va(&self) -> usize {
        self.va
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_stack(&self) -> bool {
        self.stack
    }

    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// The type the page has or will have once initialized.
    pub fn vm_type(&self) -> VmType {
        match &self.backing {
            Backing::Uninit(init) => init.target_type(),
            _ => self.backing_type(),
        }
    }

    /// The type of the current backing, `Uninit` for untouched pages.
    pub fn backing_type(&self) -> VmType {
        match self.backing {
            Backing::Uninit(_) => VmType::Uninit,
            Backing::Anon(_) => VmType::Anon,
            Backing::File(_) => VmType::File,
        }
    }

    /// The file mapping the page belongs to, whether loaded or not.
    pub fn mapping(&self) -> Option<&Arc<Mapping>> {
        match &self.backing {
            Backing::Uninit(Initializer::File(file_page)) | Backing::File(file_page) => {
                Some(file_page.mapping())
            }
            _ => None,
        }
    }
}

impl Backing {
    /// Fills a freshly acquired, zeroed frame. An untouched page runs its
    /// initializer and takes on its target type.
    pub(super) fn swap_in(&mut self, swap: &SwapSpace, tid: Tid, frame: &mut FrameBytes) -> Result<()> {
        match self {
            Self::Uninit(init) => init.load(tid, frame)?,
            Self::Anon(anon) => return anon.swap_in(swap, frame),
            Self::File(file_page) => return file_page.swap_in(tid, frame),
        }
        let Self::Uninit(init) = core::mem::replace(self, Self::Anon(AnonPage::default())) else {
            return Ok(());
        };
        *self = init.into_backing();
        Ok(())
    }

    /// Moves a resident page's contents out of `frame` and unmaps it.
    pub(super) fn swap_out(
        &mut self,
        va: usize,
        swap: &SwapSpace,
        tid: Tid,
        frame: &FrameBytes,
        page_manager: &mut PageManager,
    ) -> Result<()> {
        match self {
            Self::Uninit(_) => panic!("resident page {va:#x} is uninitialized"),
            Self::Anon(anon) => anon.swap_out(va, swap, frame, page_manager),
            Self::File(file_page) => file_page.swap_out(va, tid, frame, page_manager),
        }
    }

    /// Releases what the backing holds. `frame` holds the contents when the
    /// page is resident, so dirty file pages can be written back.
    pub(super) fn destroy(
        &mut self,
        va: usize,
        swap: &SwapSpace,
        tid: Tid,
        frame: Option<&FrameBytes>,
        page_manager: &mut PageManager,
    ) -> Result<()> {
        match self {
            Self::Uninit(_) => Ok(()),
            Self::Anon(anon) => {
                anon.destroy(swap);
                Ok(())
            }
            Self::File(file_page) => match frame {
                Some(frame) => file_page.write_back(va, tid, frame, page_manager),
                None => Ok(()),
            },
        }
    }
}
