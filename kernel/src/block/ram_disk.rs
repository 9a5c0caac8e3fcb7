use super::block_core::{Block, BlockOp, BlockSector, BlockType, BLOCK_SECTOR_SIZE};
use super::block_error::BlockError;
use alloc::{boxed::Box, vec, vec::Vec};

/// A block device driver backed by kernel memory.
pub struct RamDisk {
    sects: Vec<[u8; BLOCK_SECTOR_SIZE]>,
}

impl RamDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            sects: vec![[0; BLOCK_SECTOR_SIZE]; sectors],
        }
    }

    /// A [`Block`] of `sectors` zeroed sectors driven by a fresh `RamDisk`.
    pub fn block(name: &str, block_type: BlockType, sectors: BlockSector) -> Block {
        Block::new(
            name,
            block_type,
            sectors,
            Box::new(Self::new(sectors as usize)),
        )
    }
}

impl BlockOp for RamDisk {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        let sect = self
            .sects
            .get(sector as usize)
            .ok_or(BlockError::ReadError)?;
        buf.copy_from_slice(sect);
        Ok(())
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        let sect = self
            .sects
            .get_mut(sector as usize)
            .ok_or(BlockError::WriteError)?;
        sect.copy_from_slice(buf);
        Ok(())
    }
}
