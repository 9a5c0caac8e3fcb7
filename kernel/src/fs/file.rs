use super::{FileSystem, INodeNum, Result};
use alloc::sync::Arc;

/// An open file with its own cursor. Dropping it closes it.
pub struct File {
    fs: Arc<FileSystem>,
    inum: INodeNum,
    pos: usize,
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "<File inode={} pos={}>", self.inum, self.pos)
    }
}

impl File {
    pub(super) fn new(fs: Arc<FileSystem>, inum: INodeNum, pos: usize) -> Self {
        Self { fs, inum, pos }
    }

    pub fn inode(&self) -> INodeNum {
        self.inum
    }

    pub fn file_system(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    /// Reads from the cursor and advances it by the number of bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.fs.read_at(self.inum, buf, self.pos)?;
        self.pos += n;
        Ok(n)
    }

    /// Writes at the cursor and advances it by the number of bytes written.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.fs.write_at(self.inum, buf, self.pos)?;
        self.pos += n;
        Ok(n)
    }

    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        self.fs.read_at(self.inum, buf, offset)
    }

    pub fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize> {
        self.fs.write_at(self.inum, buf, offset)
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn length(&self) -> Result<usize> {
        self.fs.length(self.inum)
    }

    /// A new handle to the same file with its cursor at the start.
    pub fn reopen(&self) -> Result<Self> {
        self.fs.reopen(self.inum)?;
        Ok(Self::new(self.fs.clone(), self.inum, 0))
    }

    /// A new handle to the same file sharing this handle's cursor position.
    pub fn duplicate(&self) -> Result<Self> {
        self.fs.reopen(self.inum)?;
        Ok(Self::new(self.fs.clone(), self.inum, self.pos))
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.fs.close(self.inum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, RamDisk};

    #[test]
    fn cursor() {
        let fs = FileSystem::format(RamDisk::block("fs", BlockType::FileSystem, 64)).unwrap();
        let inum = fs.create(b"hello world").unwrap();
        let mut file = fs.open(inum).unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(file.tell(), 5);

        let dup = file.duplicate().unwrap();
        assert_eq!(dup.tell(), 5);
        assert_eq!(file.reopen().unwrap().tell(), 0);

        file.seek(6);
        file.write(b"there").unwrap();
        assert_eq!(file.tell(), 11);
        let mut all = [0u8; 11];
        dup.read_at(&mut all, 0).unwrap();
        assert_eq!(&all, b"hello there");
        assert_eq!(fs.open_count(inum), 2);
    }
}
