pub const KB: usize = 1024;
pub const MB: usize = KB * KB;
pub const SECTOR_SIZE: usize = 512;
