//! A small FAT-style file store.
//!
//! Files are named by inode number; there are no directories. Each inode is
//! a cluster chain plus a byte length. The inode records live in the root
//! directory cluster chain and are written back, together with the FAT, on
//! [`FileSystem::unmount`].

pub mod fat;
pub mod file;

use crate::block::{Block, BlockError, BLOCK_SECTOR_SIZE};
use crate::sync::{HolderLock, Mutex};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::cmp::min;
use fat::{Cluster, Fat, ROOT_DIR_CLUSTER};
pub use file::File;
use zerocopy::little_endian::U32;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

pub type INodeNum = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// no such inode
    NotFound,
    /// no space left on device
    NoSpace,
    /// the device does not hold a valid file system
    BadFormat,
    /// the underlying device failed
    Block(BlockError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::BadFormat => write!(f, "bad file system format"),
            Self::Block(e) => write!(f, "block device error: {e}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<BlockError> for Error {
    fn from(e: BlockError) -> Self {
        Self::Block(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// On-disk inode record, stored in the root directory chain at index `inum`.
#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
struct INodeRecord {
    in_use: U32,
    start: U32,
    length: U32,
    _reserved: U32,
}

const RECORDS_PER_SECTOR: usize = BLOCK_SECTOR_SIZE / core::mem::size_of::<INodeRecord>();

#[derive(Debug)]
struct INode {
    /// First cluster, 0 while the file is empty.
    start: Cluster,
    length: usize,
    open_count: usize,
    removed: bool,
}

struct FsInner {
    device: Block,
    fat: Fat,
    inodes: BTreeMap<INodeNum, INode>,
}

pub struct FileSystem {
    inner: Mutex<FsInner>,
    /// Serializes file-system operations issued on behalf of processes.
    lock: HolderLock,
}

impl FileSystem {
    /// Creates an empty file system on `device`, overwriting whatever it held.
    pub fn format(mut device: Block) -> Result<Arc<Self>> {
        let fat = Fat::create(device.get_size())?;
        let zeros = [0u8; BLOCK_SECTOR_SIZE];
        device.write(fat.cluster_to_sector(ROOT_DIR_CLUSTER), &zeros)?;
        fat.close(&mut device)?;
        log::info!("fs: formatted {} ({fat:?})", device.get_name());
        Ok(Arc::new(Self::with_inner(FsInner {
            device,
            fat,
            inodes: BTreeMap::new(),
        })))
    }

    /// Opens the file system stored on `device`.
    pub fn mount(mut device: Block) -> Result<Arc<Self>> {
        let fat = Fat::open(&mut device)?;
        let mut inodes = BTreeMap::new();
        let mut bounce = [0u8; BLOCK_SECTOR_SIZE];
        let mut inum: INodeNum = 0;
        for clst in fat.chain(ROOT_DIR_CLUSTER) {
            device.read(fat.cluster_to_sector(clst), &mut bounce)?;
            for raw in bounce.chunks_exact(core::mem::size_of::<INodeRecord>()) {
                let record = INodeRecord::read_from(raw).ok_or(Error::BadFormat)?;
                if record.in_use.get() != 0 {
                    inodes.insert(
                        inum,
                        INode {
                            start: record.start.get(),
                            length: record.length.get() as usize,
                            open_count: 0,
                            removed: false,
                        },
                    );
                }
                inum += 1;
            }
        }
        log::info!(
            "fs: mounted {} with {} files",
            device.get_name(),
            inodes.len()
        );
        Ok(Arc::new(Self::with_inner(FsInner {
            device,
            fat,
            inodes,
        })))
    }

    fn with_inner(inner: FsInner) -> Self {
        Self {
            inner: Mutex::new(inner),
            lock: HolderLock::new(),
        }
    }

    /// Writes the inode records and the FAT back to the device.
    pub fn unmount(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let live: Vec<_> = inner
            .inodes
            .iter()
            .filter(|(_, inode)| !inode.removed)
            .map(|(&inum, inode)| (inum, inode.start, inode.length))
            .collect();
        let needed = live
            .last()
            .map_or(1, |&(inum, ..)| inum as usize / RECORDS_PER_SECTOR + 1);

        let mut chain: Vec<Cluster> = inner.fat.chain(ROOT_DIR_CLUSTER).collect();
        while chain.len() < needed {
            let tail = chain.last().copied().unwrap_or(ROOT_DIR_CLUSTER);
            chain.push(inner.fat.create_chain(tail).ok_or(Error::NoSpace)?);
        }

        let mut records = live.into_iter().peekable();
        for (i, &clst) in chain.iter().enumerate() {
            let mut sector = [INodeRecord::new_zeroed(); RECORDS_PER_SECTOR];
            let first = (i * RECORDS_PER_SECTOR) as INodeNum;
            while let Some(&(inum, start, length)) = records.peek() {
                if inum >= first + RECORDS_PER_SECTOR as INodeNum {
                    break;
                }
                sector[(inum - first) as usize] = INodeRecord {
                    in_use: U32::new(1),
                    start: U32::new(start),
                    length: U32::new(length as u32),
                    _reserved: U32::new(0),
                };
                records.next();
            }
            let sect = inner.fat.cluster_to_sector(clst);
            inner.device.write(sect, sector.as_bytes())?;
        }
        inner.fat.close(&mut inner.device)?;
        log::info!("fs: unmounted {}", inner.device.get_name());
        Ok(())
    }

    /// The global file-system lock.
    pub fn lock(&self) -> &HolderLock {
        &self.lock
    }

    /// Creates a file holding `data` and returns its inode number.
    pub fn create(&self, data: &[u8]) -> Result<INodeNum> {
        let mut inner = self.inner.lock();
        let inum = (0..)
            .find(|n| !inner.inodes.contains_key(n))
            .ok_or(Error::NoSpace)?;
        inner.inodes.insert(
            inum,
            INode {
                start: 0,
                length: 0,
                open_count: 0,
                removed: false,
            },
        );
        if let Err(e) = inner.write_at(inum, data, 0) {
            inner.release(inum);
            return Err(e);
        }
        log::debug!("fs: created inode {inum} ({} bytes)", data.len());
        Ok(inum)
    }

    pub fn open(self: &Arc<Self>, inum: INodeNum) -> Result<File> {
        self.inner.lock().open(inum)?;
        Ok(File::new(self.clone(), inum, 0))
    }

    /// Removes a file. Its clusters are freed when the last handle closes.
    pub fn remove(&self, inum: INodeNum) -> Result<()> {
        let mut inner = self.inner.lock();
        let inode = inner.inode_mut(inum)?;
        inode.removed = true;
        if inode.open_count == 0 {
            inner.release(inum);
        }
        Ok(())
    }

    /// Number of open handles to `inum`, 0 if it does not exist.
    pub fn open_count(&self, inum: INodeNum) -> usize {
        self.inner
            .lock()
            .inodes
            .get(&inum)
            .map_or(0, |inode| inode.open_count)
    }

    pub fn free_clusters(&self) -> usize {
        self.inner.lock().fat.free_clusters()
    }

    /// Number of sectors written to the device so far.
    pub fn sectors_written(&self) -> u64 {
        self.inner.lock().device.write_count()
    }

    fn length(&self, inum: INodeNum) -> Result<usize> {
        Ok(self.inner.lock().inode(inum)?.length)
    }

    fn read_at(&self, inum: INodeNum, buf: &mut [u8], offset: usize) -> Result<usize> {
        self.inner.lock().read_at(inum, buf, offset)
    }

    fn write_at(&self, inum: INodeNum, buf: &[u8], offset: usize) -> Result<usize> {
        self.inner.lock().write_at(inum, buf, offset)
    }

    fn reopen(&self, inum: INodeNum) -> Result<()> {
        self.inner.lock().open(inum)
    }

    fn close(&self, inum: INodeNum) {
        let mut inner = self.inner.lock();
        let Ok(inode) = inner.inode_mut(inum) else {
            return;
        };
        inode.open_count -= 1;
        if inode.open_count == 0 && inode.removed {
            inner.release(inum);
        }
    }
}

impl FsInner {
    fn inode(&self, inum: INodeNum) -> Result<&INode> {
        self.inodes.get(&inum).ok_or(Error::NotFound)
    }

    fn inode_mut(&mut self, inum: INodeNum) -> Result<&mut INode> {
        self.inodes.get_mut(&inum).ok_or(Error::NotFound)
    }

    fn open(&mut self, inum: INodeNum) -> Result<()> {
        let inode = self.inode_mut(inum)?;
        if inode.removed {
            return Err(Error::NotFound);
        }
        inode.open_count += 1;
        Ok(())
    }

    fn release(&mut self, inum: INodeNum) {
        if let Some(inode) = self.inodes.remove(&inum) {
            if inode.start != 0 {
                self.fat.remove_chain(inode.start, 0);
            }
            log::debug!("fs: released inode {inum}");
        }
    }

    fn read_at(&mut self, inum: INodeNum, buf: &mut [u8], offset: usize) -> Result<usize> {
        let inode = self.inode(inum)?;
        let (start, length) = (inode.start, inode.length);
        if offset >= length {
            return Ok(0);
        }
        let total = min(buf.len(), length - offset);
        let mut bounce = [0u8; BLOCK_SECTOR_SIZE];
        let mut clusters = self.fat.chain(start).skip(offset / BLOCK_SECTOR_SIZE);
        let mut done = 0;
        while done < total {
            let pos = offset + done;
            let clst = clusters.next().ok_or(Error::BadFormat)?;
            let in_sector = pos % BLOCK_SECTOR_SIZE;
            let n = min(total - done, BLOCK_SECTOR_SIZE - in_sector);
            self.device
                .read(self.fat.cluster_to_sector(clst), &mut bounce)?;
            buf[done..done + n].copy_from_slice(&bounce[in_sector..in_sector + n]);
            done += n;
        }
        Ok(done)
    }

    /// Writes `buf` at `offset`, growing the file as needed. Clusters added to
    /// the file are zeroed first, so a gap left by writing past the end reads
    /// back as zeros.
    fn write_at(&mut self, inum: INodeNum, buf: &[u8], offset: usize) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset + buf.len();
        self.grow(inum, end.div_ceil(BLOCK_SECTOR_SIZE))?;

        let start = self.inode(inum)?.start;
        let clusters: Vec<Cluster> = self
            .fat
            .chain(start)
            .skip(offset / BLOCK_SECTOR_SIZE)
            .take((end - 1) / BLOCK_SECTOR_SIZE - offset / BLOCK_SECTOR_SIZE + 1)
            .collect();
        let mut bounce = [0u8; BLOCK_SECTOR_SIZE];
        let mut done = 0;
        for clst in clusters {
            let pos = offset + done;
            let in_sector = pos % BLOCK_SECTOR_SIZE;
            let n = min(buf.len() - done, BLOCK_SECTOR_SIZE - in_sector);
            let sector = self.fat.cluster_to_sector(clst);
            if n < BLOCK_SECTOR_SIZE {
                self.device.read(sector, &mut bounce)?;
            }
            bounce[in_sector..in_sector + n].copy_from_slice(&buf[done..done + n]);
            self.device.write(sector, &bounce)?;
            done += n;
        }

        let inode = self.inode_mut(inum)?;
        inode.length = inode.length.max(end);
        Ok(done)
    }

    /// Extends the chain of `inum` to at least `clusters` clusters.
    fn grow(&mut self, inum: INodeNum, clusters: usize) -> Result<()> {
        let start = self.inode(inum)?.start;
        let (mut have, mut tail) = self
            .fat
            .chain(start)
            .fold((0, 0), |(n, _), c| (n + 1, c));
        let zeros = [0u8; BLOCK_SECTOR_SIZE];
        while have < clusters {
            let clst = self.fat.create_chain(tail).ok_or(Error::NoSpace)?;
            self.device.write(self.fat.cluster_to_sector(clst), &zeros)?;
            if tail == 0 {
                self.inode_mut(inum)?.start = clst;
            }
            tail = clst;
            have += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, RamDisk};

    fn fresh(sectors: u32) -> Arc<FileSystem> {
        FileSystem::format(RamDisk::block("fs", BlockType::FileSystem, sectors)).unwrap()
    }

    #[test]
    fn create_read_back() {
        let fs = fresh(256);
        let data: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        let inum = fs.create(&data).unwrap();
        let file = fs.open(inum).unwrap();
        assert_eq!(file.length().unwrap(), 1500);

        let mut buf = vec![0u8; 2000];
        assert_eq!(file.read_at(&mut buf, 0).unwrap(), 1500);
        assert_eq!(&buf[..1500], &data[..]);
        assert_eq!(file.read_at(&mut buf, 1400).unwrap(), 100);
        assert_eq!(&buf[..100], &data[1400..]);
        assert_eq!(file.read_at(&mut buf, 1500).unwrap(), 0);
    }

    #[test]
    fn write_past_end_zero_fills() {
        let fs = fresh(256);
        let inum = fs.create(b"abc").unwrap();
        let file = fs.open(inum).unwrap();
        file.write_at(b"xyz", 1030).unwrap();
        assert_eq!(file.length().unwrap(), 1033);

        let mut buf = vec![0xffu8; 1033];
        file.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf[..3], b"abc");
        assert!(buf[3..1030].iter().all(|&b| b == 0));
        assert_eq!(&buf[1030..], b"xyz");
    }

    #[test]
    fn remove_waits_for_last_close() {
        let fs = fresh(64);
        let before = fs.free_clusters();
        let inum = fs.create(&[1u8; 2048]).unwrap();
        assert_eq!(fs.free_clusters(), before - 4);

        let file = fs.open(inum).unwrap();
        let other = file.reopen().unwrap();
        assert_eq!(fs.open_count(inum), 2);
        fs.remove(inum).unwrap();
        assert!(fs.open(inum).is_err());
        drop(file);
        assert_eq!(fs.free_clusters(), before - 4);
        drop(other);
        assert_eq!(fs.free_clusters(), before);
        assert_eq!(fs.open_count(inum), 0);
    }

    #[test]
    fn full_disk() {
        let fs = fresh(8);
        assert_eq!(fs.create(&[0u8; 4096]).unwrap_err(), Error::NoSpace);
        // the failed create must not leak clusters
        assert_eq!(fs.free_clusters(), 5);
    }

    #[test]
    fn persists_across_mounts() {
        let fs = fresh(512);
        let mut inums = Vec::new();
        for i in 0..40u8 {
            inums.push(fs.create(&[i; 700]).unwrap());
        }
        fs.remove(inums[3]).unwrap();
        fs.unmount().unwrap();

        let FsInner { device, .. } = Arc::into_inner(fs).unwrap().inner.into_inner();
        let fs = FileSystem::mount(device).unwrap();
        assert!(fs.open(inums[3]).is_err());
        for (i, &inum) in inums.iter().enumerate().filter(|&(i, _)| i != 3) {
            let file = fs.open(inum).unwrap();
            let mut buf = [0u8; 700];
            assert_eq!(file.read_at(&mut buf, 0).unwrap(), 700);
            assert!(buf.iter().all(|&b| b == i as u8));
        }
    }
}
