use super::{Error, Result};
use crate::block::{Block, BlockSector, BLOCK_SECTOR_SIZE};
use alloc::{vec, vec::Vec};
// These are little-endian unaligned integer types
use zerocopy::little_endian::U32;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

pub type Cluster = u32;

pub const FAT_MAGIC: u32 = 0xEB3C_9000;
pub const FAT_BOOT_SECTOR: BlockSector = 0;
pub const SECTORS_PER_CLUSTER: u32 = 1;
/// Holds the inode records.
pub const ROOT_DIR_CLUSTER: Cluster = 1;

const ENTRIES_PER_SECTOR: u32 = (BLOCK_SECTOR_SIZE / 4) as u32;
const EOCHAIN: u32 = 0x0FFF_FFFF;
const FREE_ENTRY: u32 = 0;

/// Boot record stored in sector 0.
#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct FatBoot {
    magic: U32,
    sectors_per_cluster: U32,
    total_sectors: U32,
    fat_start: U32,
    fat_sectors: U32,
    root_dir_cluster: U32,
}

impl FatBoot {
    fn new(total_sectors: u32) -> Self {
        let fat_sectors =
            (total_sectors - 1) / (ENTRIES_PER_SECTOR * SECTORS_PER_CLUSTER + 1) + 1;
        Self {
            magic: U32::new(FAT_MAGIC),
            sectors_per_cluster: U32::new(SECTORS_PER_CLUSTER),
            total_sectors: U32::new(total_sectors),
            fat_start: U32::new(1),
            fat_sectors: U32::new(fat_sectors),
            root_dir_cluster: U32::new(ROOT_DIR_CLUSTER),
        }
    }

    fn check_integrity(&self, device_size: BlockSector) -> Result<()> {
        if self.magic.get() != FAT_MAGIC {
            log::warn!("fat: bad magic 0x{:08x}", self.magic.get());
            return Err(Error::BadFormat);
        }
        if self.sectors_per_cluster.get() != SECTORS_PER_CLUSTER
            || self.total_sectors.get() != device_size
            || self.fat_start.get() != 1
            || self.fat_start.get() + self.fat_sectors.get() >= self.total_sectors.get()
        {
            log::warn!("fat: inconsistent boot record");
            return Err(Error::BadFormat);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    /// Indicates a cluster is free
    Free,
    /// Indicates a cluster is the last one of its chain.
    Eof,
    /// Indicates a cluster is not the last one of its chain, and includes the next cluster.
    HasNext(Cluster),
}

impl FatEntry {
    fn from_raw(raw: u32) -> Self {
        match raw {
            FREE_ENTRY => FatEntry::Free,
            EOCHAIN => FatEntry::Eof,
            n => FatEntry::HasNext(n),
        }
    }

    fn raw(self) -> u32 {
        match self {
            FatEntry::Free => FREE_ENTRY,
            FatEntry::Eof => EOCHAIN,
            FatEntry::HasNext(n) => n,
        }
    }
}

/// File Allocation Table
///
/// Lists the clusters which are allocated or free,
/// and maintains linked lists of clusters for files.
pub struct Fat {
    boot: FatBoot,
    /// Whole FAT sectors' worth of entries; only `1..=cluster_count` are used.
    data: Vec<u32>,
    cluster_count: u32,
    data_start: BlockSector,
    /// Where the next free-cluster scan starts.
    hint: Cluster,
}

impl core::fmt::Debug for Fat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "<FAT clusters={} free={}>",
            self.cluster_count,
            self.free_clusters()
        )
    }
}

impl Fat {
    fn with_boot(boot: FatBoot) -> Self {
        let fat_sectors = boot.fat_sectors.get();
        let data_start = boot.fat_start.get() + fat_sectors;
        let cluster_count = (boot.total_sectors.get() - data_start) / SECTORS_PER_CLUSTER;
        debug_assert!(cluster_count < fat_sectors * ENTRIES_PER_SECTOR);
        Self {
            boot,
            data: vec![FREE_ENTRY; (fat_sectors * ENTRIES_PER_SECTOR) as usize],
            cluster_count,
            data_start,
            hint: ROOT_DIR_CLUSTER + 1,
        }
    }

    /// A fresh table for a device of `total_sectors`, with only the root
    /// directory cluster allocated.
    pub fn create(total_sectors: BlockSector) -> Result<Self> {
        if total_sectors < 3 {
            return Err(Error::NoSpace);
        }
        let mut fat = Self::with_boot(FatBoot::new(total_sectors));
        fat.put(ROOT_DIR_CLUSTER, FatEntry::Eof);
        Ok(fat)
    }

    /// Reads the boot record and the table from `device`.
    pub fn open(device: &mut Block) -> Result<Self> {
        let mut bounce = [0u8; BLOCK_SECTOR_SIZE];
        device.read(FAT_BOOT_SECTOR, &mut bounce)?;
        let boot = FatBoot::read_from_prefix(&bounce).ok_or(Error::BadFormat)?;
        boot.check_integrity(device.get_size())?;

        let mut fat = Self::with_boot(boot);
        let fat_start = boot.fat_start.get();
        for (i, chunk) in fat
            .data
            .chunks_exact_mut(ENTRIES_PER_SECTOR as usize)
            .enumerate()
        {
            device.read(fat_start + i as u32, chunk.as_bytes_mut())?;
        }
        // FAT entries are stored in little endian
        for entry in fat.data.iter_mut() {
            *entry = u32::from_le(*entry);
        }

        for clst in 1..=fat.cluster_count {
            if let FatEntry::HasNext(n) = fat.get(clst) {
                if n < 1 || n > fat.cluster_count {
                    log::warn!("fat: invalid entry 0x{n:08x} at cluster {clst}");
                    return Err(Error::BadFormat);
                }
            }
        }
        log::debug!("fat: opened {fat:?}");
        Ok(fat)
    }

    /// Writes the boot record and the table back to `device`.
    pub fn close(&self, device: &mut Block) -> Result<()> {
        let mut bounce = [0u8; BLOCK_SECTOR_SIZE];
        bounce[..core::mem::size_of::<FatBoot>()].copy_from_slice(self.boot.as_bytes());
        device.write(FAT_BOOT_SECTOR, &bounce)?;

        let fat_start = self.boot.fat_start.get();
        for (i, chunk) in self
            .data
            .chunks_exact(ENTRIES_PER_SECTOR as usize)
            .enumerate()
        {
            for (dst, entry) in bounce.chunks_exact_mut(4).zip(chunk) {
                dst.copy_from_slice(&entry.to_le_bytes());
            }
            device.write(fat_start + i as u32, &bounce)?;
        }
        Ok(())
    }

    /// Adds a cluster to the chain ending at `clst`. If `clst` is 0, starts a
    /// new chain. Returns the new cluster, or `None` when the disk is full.
    pub fn create_chain(&mut self, clst: Cluster) -> Option<Cluster> {
        assert!(clst <= self.cluster_count);
        let new_clst = self.find_free()?;
        self.put(new_clst, FatEntry::Eof);
        if clst != 0 {
            debug_assert_eq!(self.get(clst), FatEntry::Eof);
            self.put(clst, FatEntry::HasNext(new_clst));
        }
        self.hint = new_clst;
        Some(new_clst)
    }

    /// Removes the chain of clusters starting from `clst`. `pclst` is the
    /// cluster right before `clst` in its chain, which becomes the new end of
    /// the chain; 0 means `clst` starts the chain.
    pub fn remove_chain(&mut self, clst: Cluster, pclst: Cluster) {
        if pclst != 0 {
            assert_eq!(self.get(pclst), FatEntry::HasNext(clst));
            self.put(pclst, FatEntry::Eof);
        }
        let mut cur = clst;
        loop {
            let next = self.get(cur);
            self.put(cur, FatEntry::Free);
            match next {
                FatEntry::Eof => break,
                FatEntry::HasNext(n) => cur = n,
                FatEntry::Free => panic!("free cluster {cur} found in a chain"),
            }
        }
    }

    pub fn get(&self, clst: Cluster) -> FatEntry {
        FatEntry::from_raw(self.data[clst as usize])
    }

    pub fn put(&mut self, clst: Cluster, entry: FatEntry) {
        debug_assert!(clst >= 1 && clst <= self.cluster_count);
        self.data[clst as usize] = entry.raw();
    }

    pub fn cluster_to_sector(&self, clst: Cluster) -> BlockSector {
        debug_assert!(clst >= 1);
        self.data_start + (clst - 1) * SECTORS_PER_CLUSTER
    }

    /// The `n`th cluster of the chain starting at `start`, if it is that long.
    pub fn nth_cluster(&self, start: Cluster, n: usize) -> Option<Cluster> {
        self.chain(start).nth(n)
    }

    pub fn chain(&self, start: Cluster) -> Chain<'_> {
        Chain {
            fat: self,
            next: (start != 0).then_some(start),
        }
    }

    pub fn free_clusters(&self) -> usize {
        (1..=self.cluster_count)
            .filter(|&c| self.get(c) == FatEntry::Free)
            .count()
    }

    fn find_free(&self) -> Option<Cluster> {
        let first = ROOT_DIR_CLUSTER + 1;
        (self.hint..=self.cluster_count)
            .chain(first..self.hint)
            .find(|&c| self.get(c) == FatEntry::Free)
    }
}

/// Iterator over the clusters of one chain.
pub struct Chain<'a> {
    fat: &'a Fat,
    next: Option<Cluster>,
}

impl Iterator for Chain<'_> {
    type Item = Cluster;

    fn next(&mut self) -> Option<Cluster> {
        let cur = self.next?;
        self.next = match self.fat.get(cur) {
            FatEntry::HasNext(n) => Some(n),
            FatEntry::Eof => None,
            FatEntry::Free => panic!("free cluster {cur} found in a chain"),
        };
        Some(cur)
    }
}
