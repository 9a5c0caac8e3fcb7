//! Builds a [`Vm`] over RAM disks for tests.

use crate::block::{BlockSector, BlockType, RamDisk};
use crate::config::VmConfig;
use crate::fs::{FileSystem, INodeNum};
use crate::mem::user::{copy_from_user, copy_to_user};
use crate::vm::{AddressSpace, FaultContext, PageFault, Vm};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use pagekern_shared::mem::SECTORS_PER_PAGE;

pub const FS_SECTORS: BlockSector = 1024;

pub fn file_system() -> Arc<FileSystem> {
    FileSystem::format(RamDisk::block("hda", BlockType::FileSystem, FS_SECTORS)).unwrap()
}

pub fn vm_with(config: VmConfig, swap_slots: usize) -> Vm {
    let swap = RamDisk::block(
        "swap",
        BlockType::Swap,
        (swap_slots * SECTORS_PER_PAGE) as BlockSector,
    );
    Vm::new(config, swap, file_system())
}

pub fn vm(user_frames: usize, swap_slots: usize) -> Vm {
    vm_with(VmConfig::default().with_user_frames(user_frames), swap_slots)
}

/// Creates a file holding `data` on the vm's file system.
pub fn create_file(vm: &Vm, data: &[u8]) -> INodeNum {
    vm.file_system().create(data).unwrap()
}

/// `len` bytes following a pattern that differs per `seed`.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn write(vm: &Vm, space: &Arc<AddressSpace>, addr: usize, data: &[u8]) -> Result<(), PageFault> {
    copy_to_user(vm, space, &FaultContext::user(addr), addr, data)
}

pub fn read(vm: &Vm, space: &Arc<AddressSpace>, addr: usize, len: usize) -> Result<Vec<u8>, PageFault> {
    let mut buf = vec![0; len];
    copy_from_user(vm, space, &FaultContext::user(addr), addr, &mut buf)?;
    Ok(buf)
}
