use std::path::Path;

use crate::block_dev::{FileStorage, Storage};
use crate::error::{FsError, Result};
use crate::fs::{DeviceInfo, FlatFileSystem};
use log::info;

/// The single open device, if any. Every operation except
/// create/open fails with [`FsError::DeviceNotOpen`] while closed.
#[derive(Default)]
pub struct BlockDevice {
    fs: Option<FlatFileSystem>,
}

impl BlockDevice {
    pub fn new() -> Self {
        Self { fs: None }
    }

    pub fn is_open(&self) -> bool {
        self.fs.is_some()
    }

    /// Create a zero-filled image at `path` and open it
    pub fn create<P: AsRef<Path>>(
        &mut self,
        path: P,
        block_size: usize,
        block_count: usize,
    ) -> Result<()> {
        // catch bad geometry before touching the host file
        crate::layout::SuperBlock::new(block_size, block_count)?;
        let len = (block_size as u64)
            .checked_mul(block_count as u64)
            .ok_or_else(|| FsError::InvalidGeometry("device size overflows".into()))?;
        let storage = FileStorage::create(path.as_ref(), len)?;
        self.create_on(Box::new(storage), block_size, block_count)?;
        info!("image {} ready", path.as_ref().display());
        Ok(())
    }

    /// Lay out a fresh filesystem on an arbitrary storage and open it
    pub fn create_on(
        &mut self,
        storage: Box<dyn Storage>,
        block_size: usize,
        block_count: usize,
    ) -> Result<()> {
        self.close_current();
        self.fs = Some(FlatFileSystem::create(storage, block_size, block_count)?);
        Ok(())
    }

    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let storage = FileStorage::open(path.as_ref())?;
        self.open_on(Box::new(storage))?;
        info!("image {} opened", path.as_ref().display());
        Ok(())
    }

    pub fn open_on(&mut self, storage: Box<dyn Storage>) -> Result<()> {
        self.close_current();
        self.fs = Some(FlatFileSystem::open(storage)?);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        let fs = self.fs.take().ok_or(FsError::DeviceNotOpen)?;
        fs.sync()?;
        info!("device closed");
        Ok(())
    }

    /// Implicit close before create/open replaces the device
    fn close_current(&mut self) {
        if let Some(fs) = self.fs.take() {
            if let Err(e) = fs.sync() {
                log::warn!("sync of the previous device failed: {}", e);
            }
        }
    }

    fn fs(&self) -> Result<&FlatFileSystem> {
        self.fs.as_ref().ok_or(FsError::DeviceNotOpen)
    }

    fn fs_mut(&mut self) -> Result<&mut FlatFileSystem> {
        self.fs.as_mut().ok_or(FsError::DeviceNotOpen)
    }

    pub fn format(&mut self) -> Result<()> {
        self.fs_mut()?.format()
    }

    pub fn read_block(&self, index: usize) -> Result<Vec<u8>> {
        self.fs()?.read_block(index)
    }

    /// Raw block write; does not touch the free-block bitmap
    pub fn write_block(&mut self, index: usize, data: &[u8]) -> Result<()> {
        self.fs_mut()?.write_block(index, data)
    }

    pub fn write_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        self.fs_mut()?.write_file(name, content)
    }

    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.fs()?.read_file(name)
    }

    pub fn remove_file(&mut self, name: &str) -> Result<()> {
        self.fs_mut()?.remove_file(name)
    }

    pub fn list_files(&self) -> Result<Vec<(String, usize)>> {
        self.fs()?.list_files()
    }

    pub fn file_size(&self, name: &str) -> Result<usize> {
        self.fs()?.file_size(name)
    }

    pub fn info(&self) -> Result<DeviceInfo> {
        self.fs()?.info()
    }

    /// Rebuild the free-block bitmap from the inode table; returns the
    /// number of leaked blocks reclaimed
    pub fn repair(&mut self) -> Result<usize> {
        self.fs_mut()?.repair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::MemStorage;

    #[test]
    fn closed_device_rejects_everything() {
        let mut dev = BlockDevice::new();
        assert!(!dev.is_open());
        assert!(matches!(dev.close(), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.format(), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.read_block(0), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.write_block(0, b"x"), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.write_file("a", b"x"), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.read_file("a"), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.remove_file("a"), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.list_files(), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.info(), Err(FsError::DeviceNotOpen)));
        assert!(matches!(dev.repair(), Err(FsError::DeviceNotOpen)));
    }

    #[test]
    fn scenario_on_memory_storage() {
        let mut dev = BlockDevice::new();
        dev.create_on(Box::new(MemStorage::new(137 * 20)), 137, 20)
            .unwrap();
        dev.write_file("a.txt", b"hello").unwrap();
        assert_eq!(dev.read_file("a.txt").unwrap(), b"hello");
        assert_eq!(dev.list_files().unwrap(), vec![("a.txt".to_string(), 5)]);
        dev.remove_file("a.txt").unwrap();
        assert!(dev.list_files().unwrap().is_empty());
        dev.close().unwrap();
        assert!(!dev.is_open());
    }

    #[test]
    fn failed_open_leaves_device_closed() {
        let mut dev = BlockDevice::new();
        dev.create_on(Box::new(MemStorage::new(137 * 20)), 137, 20)
            .unwrap();
        assert!(dev.open_on(Box::new(MemStorage::new(8))).is_err());
        assert!(!dev.is_open());
    }
}
