use crate::sizes::{KB, MB, SECTOR_SIZE};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;
pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / SECTOR_SIZE;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

// Physical address of the first frame handed out to user pages. Everything
// below belongs to the kernel image, its heap and its page tables.
pub const USER_POOL_BASE: usize = 16 * MB;

// The user stack grows down from the kernel boundary.
pub const USER_STACK: usize = OFFSET;
pub const MAX_STACK_SIZE: usize = MB;

// `push` faults before it moves the stack pointer, and x86 can push up to
// eight bytes at once.
pub const STACK_GUARD: usize = 8;

#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    addr.next_multiple_of(PAGE_FRAME_SIZE)
}

#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_user_vaddr(addr: usize) -> bool {
    addr < OFFSET
}

#[inline]
pub const fn is_kernel_vaddr(addr: usize) -> bool {
    addr >= OFFSET
}

/// Kernel virtual address at which physical address `phys` is mapped.
#[inline]
pub const fn phys_to_kva(phys: usize) -> usize {
    phys + OFFSET
}

#[inline]
pub const fn kva_to_phys(kva: usize) -> usize {
    debug_assert!(kva >= OFFSET);
    kva - OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0x1000_0fff), 0x1000_0000);
        assert_eq!(page_round_up(0x1000_0001), 0x1000_1000);
        assert_eq!(page_round_up(0x1000_0000), 0x1000_0000);
        assert_eq!(page_offset(0x1234_5678), 0x678);
    }

    #[test]
    fn address_split() {
        assert!(is_user_vaddr(USER_STACK - 1));
        assert!(is_kernel_vaddr(USER_STACK));
        assert_eq!(kva_to_phys(phys_to_kva(USER_POOL_BASE)), USER_POOL_BASE);
    }
}
