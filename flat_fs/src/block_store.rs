use crate::block_dev::Storage;
use crate::error::{FsError, Result};

/// Fixed-size block access on top of a [`Storage`].
/// No caching: every call is one positioned I/O on the medium.
pub struct BlockStore {
    storage: Box<dyn Storage>,
    block_size: usize,
}

impl BlockStore {
    pub fn new(storage: Box<dyn Storage>, block_size: usize) -> Self {
        Self {
            storage,
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Derived from the current medium length on every call
    pub fn block_count(&self) -> Result<usize> {
        let len = self.storage.len()?;
        Ok((len / self.block_size as u64) as usize)
    }

    fn check_index(&self, index: usize) -> Result<usize> {
        let block_count = self.block_count()?;
        if index >= block_count {
            return Err(FsError::BlockOutOfRange { index, block_count });
        }
        Ok(block_count)
    }

    pub fn read_block(&self, index: usize) -> Result<Vec<u8>> {
        self.check_index(index)?;
        let mut data = vec![0u8; self.block_size];
        self.storage
            .read_at((index * self.block_size) as u64, &mut data)?;
        Ok(data)
    }

    /// Writes exactly one block, zero-padding `data` if it is short
    pub fn write_block(&self, index: usize, data: &[u8]) -> Result<()> {
        if data.len() > self.block_size {
            return Err(FsError::DataTooLarge {
                len: data.len(),
                block_size: self.block_size,
            });
        }
        self.check_index(index)?;
        let offset = (index * self.block_size) as u64;
        if data.len() == self.block_size {
            self.storage.write_at(offset, data)?;
        } else {
            let mut block = vec![0u8; self.block_size];
            block[..data.len()].copy_from_slice(data);
            self.storage.write_at(offset, &block)?;
        }
        Ok(())
    }

    /// Positioned record read, not necessarily block aligned
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_span(offset, buf.len())?;
        self.storage.read_at(offset as u64, buf)?;
        Ok(())
    }

    /// Positioned record write, not necessarily block aligned
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<()> {
        self.check_span(offset, buf.len())?;
        self.storage.write_at(offset as u64, buf)?;
        Ok(())
    }

    fn check_span(&self, offset: usize, len: usize) -> Result<()> {
        let block_count = self.block_count()?;
        let end = offset.saturating_add(len);
        if end > block_count * self.block_size {
            return Err(FsError::BlockOutOfRange {
                index: (end - 1) / self.block_size,
                block_count,
            });
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.storage.sync()?;
        Ok(())
    }
}
