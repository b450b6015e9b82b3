use crate::bitmap::BlockBitmap;
use crate::block_dev::Storage;
use crate::block_store::BlockStore;
use crate::config::{SUPER_BLOCK_ID, SUPER_BLOCK_SIZE};
use crate::error::{FsError, Result};
use crate::inode_table::InodeTable;
use crate::layout::SuperBlock;
use log::{debug, info, warn};

/// superblock, free-block bitmap, inode table, data
pub struct FlatFileSystem {
    pub(crate) store: BlockStore,
    pub(crate) super_block: SuperBlock,
    pub(crate) bitmap: BlockBitmap,
    pub(crate) inode_table: InodeTable,
}

/// Layout summary of an open device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub initial_block: usize,
    pub inodes_per_block: usize,
    pub block_size: usize,
    pub block_count: usize,
    pub bitmap_block_pos: usize,
    pub inode_table_start_block: usize,
    pub inode_capacity: usize,
    pub free_blocks: usize,
}

impl FlatFileSystem {
    /// Lay out a fresh filesystem on `storage`, which must be exactly
    /// `block_size * block_count` bytes long
    pub fn create(storage: Box<dyn Storage>, block_size: usize, block_count: usize) -> Result<Self> {
        let super_block = SuperBlock::new(block_size, block_count)?;
        let needed = (block_size as u64).saturating_mul(block_count as u64);
        let available = storage.len()?;
        if available != needed {
            return Err(FsError::InvalidGeometry(format!(
                "storage of {} bytes does not match {} blocks of {} bytes",
                available, block_count, block_size
            )));
        }
        let store = BlockStore::new(storage, block_size);
        let mut fs = Self {
            inode_table: InodeTable::new(&super_block),
            bitmap: BlockBitmap::new(block_count),
            store,
            super_block,
        };
        fs.initialize()?;
        info!(
            "created device: {} blocks of {} bytes, data region starts at block {}",
            block_count, block_size, super_block.initial_block
        );
        Ok(fs)
    }

    /// Load a filesystem previously laid out on `storage`
    pub fn open(storage: Box<dyn Storage>) -> Result<Self> {
        let len = storage.len()?;
        if len < SUPER_BLOCK_SIZE as u64 {
            return Err(FsError::NotAFilesystem(format!(
                "{} bytes cannot hold a superblock",
                len
            )));
        }
        let mut raw = [0u8; SUPER_BLOCK_SIZE];
        storage.read_at(0, &mut raw)?;
        let super_block = SuperBlock::decode(&raw);
        let block_count = super_block.validate(len)?;

        let store = BlockStore::new(storage, super_block.block_size());
        let inode_table = InodeTable::new(&super_block);
        let bitmap = Self::load_bitmap(&store, &super_block, block_count)?;
        let mut fs = Self {
            store,
            super_block,
            bitmap,
            inode_table,
        };
        if let Some(problem) = fs.bitmap_problem()? {
            warn!("free-block bitmap is inconsistent ({}), rebuilding from the inode table", problem);
            fs.repair()?;
        }
        info!(
            "opened device: {} blocks of {} bytes, {} free",
            block_count,
            super_block.block_size,
            fs.bitmap.free_count()
        );
        Ok(fs)
    }

    /// Full wipe keeping the current geometry
    pub fn format(&mut self) -> Result<()> {
        let block_count = self.store.block_count()?;
        self.super_block = SuperBlock::new(self.store.block_size(), block_count)?;
        self.inode_table = InodeTable::new(&self.super_block);
        self.bitmap = BlockBitmap::new(block_count);
        self.initialize()?;
        info!("formatted device: {} blocks", block_count);
        Ok(())
    }

    /// zero every block, write superblock, free inodes and a fresh bitmap
    fn initialize(&mut self) -> Result<()> {
        for block_id in 0..self.bitmap.len() {
            self.store.write_block(block_id, &[])?;
        }
        self.store
            .write_block(SUPER_BLOCK_ID, &self.super_block.encode())?;
        self.inode_table.reset(&self.store)?;
        for block_id in 0..self.super_block.data_start() {
            self.bitmap.mark_used(block_id);
        }
        self.sync_bitmap()?;
        self.store.sync()
    }

    fn load_bitmap(
        store: &BlockStore,
        super_block: &SuperBlock,
        block_count: usize,
    ) -> Result<BlockBitmap> {
        let start = super_block.bitmap_block_pos as usize;
        let mut bytes = Vec::with_capacity(super_block.bitmap_blocks() * store.block_size());
        for block_id in start..start + super_block.bitmap_blocks() {
            bytes.extend_from_slice(&store.read_block(block_id)?);
        }
        Ok(BlockBitmap::from_bytes(&bytes, block_count))
    }

    /// Write the whole bitmap region
    fn sync_bitmap(&self) -> Result<()> {
        let block_size = self.store.block_size();
        let start = self.super_block.bitmap_block_pos as usize;
        let bytes = self
            .bitmap
            .to_bytes(self.super_block.bitmap_blocks() * block_size);
        for (i, chunk) in bytes.chunks(block_size).enumerate() {
            self.store.write_block(start + i, chunk)?;
        }
        Ok(())
    }

    /// Write only the bitmap block holding the bit of `block_id`
    fn sync_bitmap_of(&self, block_id: usize) -> Result<()> {
        let block_size = self.store.block_size();
        let bits_per_block = block_size * 8;
        let bitmap_block = block_id / bits_per_block;
        let bytes = self
            .bitmap
            .to_bytes(self.super_block.bitmap_blocks() * block_size);
        let start = bitmap_block * block_size;
        self.store.write_block(
            self.super_block.bitmap_block_pos as usize + bitmap_block,
            &bytes[start..start + block_size],
        )
    }

    /// First free data block, marked used and persisted
    pub fn alloc_data_block(&mut self) -> Result<Option<usize>> {
        match self.bitmap.alloc(self.super_block.data_start()) {
            Some(block_id) => {
                self.sync_bitmap_of(block_id)?;
                debug!("allocated data block {}", block_id);
                Ok(Some(block_id))
            }
            None => Ok(None),
        }
    }

    /// Return a data block to the free pool; freeing a free block is a no-op
    pub fn dealloc_data_block(&mut self, block_id: usize) -> Result<()> {
        if !self.is_data_block(block_id) {
            return Err(FsError::BlockOutOfRange {
                index: block_id,
                block_count: self.bitmap.len(),
            });
        }
        self.bitmap.dealloc(block_id);
        self.sync_bitmap_of(block_id)?;
        debug!("released data block {}", block_id);
        Ok(())
    }

    pub fn is_data_block(&self, block_id: usize) -> bool {
        (self.super_block.data_start()..self.bitmap.len()).contains(&block_id)
    }

    pub fn block_size(&self) -> usize {
        self.store.block_size()
    }

    /// Bitmap implied by the inode table: metadata plus every live pointer
    fn bitmap_from_inodes(&self) -> Result<BlockBitmap> {
        let mut bitmap = BlockBitmap::new(self.bitmap.len());
        for block_id in 0..self.super_block.data_start() {
            bitmap.mark_used(block_id);
        }
        for entry in self.inode_table.live(&self.store) {
            let (_, inode) = entry?;
            for block_id in inode.blocks().filter(|&id| self.is_data_block(id)) {
                bitmap.mark_used(block_id);
            }
        }
        Ok(bitmap)
    }

    /// A metadata block or a referenced data block marked free.
    /// Used blocks nobody references are leaks, not inconsistencies.
    fn bitmap_problem(&self) -> Result<Option<String>> {
        if let Some(block_id) =
            (0..self.super_block.data_start()).find(|&id| self.bitmap.is_free(id))
        {
            return Ok(Some(format!("metadata block {} marked free", block_id)));
        }
        for entry in self.inode_table.live(&self.store) {
            let (_, inode) = entry?;
            let unmarked = inode
                .blocks()
                .find(|&id| self.is_data_block(id) && self.bitmap.is_free(id));
            if let Some(block_id) = unmarked {
                return Ok(Some(format!(
                    "block {} of {} marked free",
                    block_id,
                    inode.name()
                )));
            }
        }
        Ok(None)
    }

    /// Rebuild the bitmap from the inode table and persist it.
    /// Returns how many leaked blocks were reclaimed.
    pub fn repair(&mut self) -> Result<usize> {
        let rebuilt = self.bitmap_from_inodes()?;
        let reclaimed = (0..rebuilt.len())
            .filter(|&id| rebuilt.is_free(id) && !self.bitmap.is_free(id))
            .count();
        self.bitmap = rebuilt;
        self.sync_bitmap()?;
        if reclaimed > 0 {
            info!("repair reclaimed {} leaked blocks", reclaimed);
        }
        Ok(reclaimed)
    }

    pub fn info(&self) -> Result<DeviceInfo> {
        let sb = &self.super_block;
        Ok(DeviceInfo {
            initial_block: sb.initial_block as usize,
            inodes_per_block: sb.inodes_per_block as usize,
            block_size: self.store.block_size(),
            block_count: self.store.block_count()?,
            bitmap_block_pos: sb.bitmap_block_pos as usize,
            inode_table_start_block: sb.inode_table_start_block as usize,
            inode_capacity: self.inode_table.capacity(),
            free_blocks: self.bitmap.free_count(),
        })
    }

    pub fn read_block(&self, block_id: usize) -> Result<Vec<u8>> {
        self.store.read_block(block_id)
    }

    pub fn write_block(&self, block_id: usize, data: &[u8]) -> Result<()> {
        self.store.write_block(block_id, data)
    }

    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::MemStorage;

    fn mem_fs(block_size: usize, block_count: usize) -> FlatFileSystem {
        let storage = MemStorage::new(block_size * block_count);
        FlatFileSystem::create(Box::new(storage), block_size, block_count).unwrap()
    }

    #[test]
    fn create_marks_metadata_used() {
        let fs = mem_fs(137, 20);
        let info = fs.info().unwrap();
        assert_eq!(info.initial_block, 7);
        assert_eq!(info.block_count, 20);
        assert_eq!(info.free_blocks, 13);
        assert_eq!(info.inode_capacity, 5);
        assert!(!fs.bitmap.is_free(0));
        assert!(fs.bitmap.is_free(7));
    }

    #[test]
    fn create_rejects_undersized_storage() {
        let storage = MemStorage::new(137 * 10);
        assert!(matches!(
            FlatFileSystem::create(Box::new(storage), 137, 20),
            Err(FsError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn create_rejects_oversized_storage() {
        let storage = MemStorage::new(137 * 40);
        assert!(matches!(
            FlatFileSystem::create(Box::new(storage), 137, 20),
            Err(FsError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn format_keeps_geometry() {
        let mut fs = mem_fs(137, 20);
        fs.alloc_data_block().unwrap();
        let before = fs.info().unwrap();
        fs.format().unwrap();
        let after = fs.info().unwrap();
        assert_eq!(after.block_count, 20);
        assert_eq!(after.initial_block, before.initial_block);
        assert_eq!(after.inode_capacity, before.inode_capacity);
        assert_eq!(after.free_blocks, 13);
    }

    #[test]
    fn alloc_walks_data_region_and_persists() {
        let mut fs = mem_fs(137, 10);
        let data: Vec<_> = std::iter::from_fn(|| fs.alloc_data_block().unwrap()).collect();
        assert_eq!(data, vec![5, 6, 7, 8, 9]);
        fs.dealloc_data_block(6).unwrap();
        fs.dealloc_data_block(6).unwrap();
        assert_eq!(fs.alloc_data_block().unwrap(), Some(6));
        // bitmap block: bits 0..=9 used
        let raw = fs.read_block(1).unwrap();
        assert_eq!(&raw[..2], &[0xff, 0b11]);
    }

    #[test]
    fn dealloc_rejects_metadata_blocks() {
        let mut fs = mem_fs(137, 10);
        assert!(matches!(
            fs.dealloc_data_block(2),
            Err(FsError::BlockOutOfRange { index: 2, .. })
        ));
        assert!(fs.dealloc_data_block(10).is_err());
    }

    #[test]
    fn open_rejects_tiny_or_foreign_storage() {
        let tiny = MemStorage::new(16);
        assert!(matches!(
            FlatFileSystem::open(Box::new(tiny)),
            Err(FsError::NotAFilesystem(_))
        ));
        let blank = MemStorage::new(137 * 20);
        assert!(matches!(
            FlatFileSystem::open(Box::new(blank)),
            Err(FsError::NotAFilesystem(_))
        ));
    }

    #[test]
    fn open_reloads_persisted_bitmap() {
        let mut fs = mem_fs(137, 20);
        fs.alloc_data_block().unwrap();
        fs.alloc_data_block().unwrap();
        let image = {
            let FlatFileSystem { store, .. } = fs;
            let mut bytes = vec![0u8; 137 * 20];
            store.read_at(0, &mut bytes).unwrap();
            bytes
        };
        let fs = FlatFileSystem::open(Box::new(MemStorage::from_bytes(image))).unwrap();
        // allocated but unreferenced blocks stay allocated until repair
        assert_eq!(fs.info().unwrap().free_blocks, 11);
    }

    #[test]
    fn repair_reclaims_leaked_blocks() {
        let mut fs = mem_fs(137, 20);
        fs.alloc_data_block().unwrap();
        fs.alloc_data_block().unwrap();
        assert_eq!(fs.repair().unwrap(), 2);
        assert_eq!(fs.info().unwrap().free_blocks, 13);
        assert_eq!(fs.repair().unwrap(), 0);
    }
}
