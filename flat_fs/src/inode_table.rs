use crate::block_store::BlockStore;
use crate::config::DISK_INODE_SIZE;
use crate::error::{FsError, Result};
use crate::layout::{DiskInode, SuperBlock};

/// Location of one inode record: (block, slot within the block)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InodePos {
    pub block_id: usize,
    pub slot: usize,
}

impl InodePos {
    pub fn offset(&self, block_size: usize) -> usize {
        self.block_id * block_size + self.slot * DISK_INODE_SIZE
    }
}

/// Fixed-capacity array of inode records in `[start_block, end_block)`.
/// Holds no records itself; every access goes to the store.
#[derive(Debug, Clone, Copy)]
pub struct InodeTable {
    start_block: usize,
    end_block: usize,
    inodes_per_block: usize,
}

impl InodeTable {
    pub fn new(super_block: &SuperBlock) -> Self {
        Self {
            start_block: super_block.inode_table_start_block as usize,
            end_block: super_block.initial_block as usize,
            inodes_per_block: super_block.inodes_per_block as usize,
        }
    }

    pub fn capacity(&self) -> usize {
        (self.end_block - self.start_block) * self.inodes_per_block
    }

    pub fn read_at(&self, store: &BlockStore, pos: InodePos) -> Result<DiskInode> {
        let mut buf = [0u8; DISK_INODE_SIZE];
        store.read_at(pos.offset(store.block_size()), &mut buf)?;
        Ok(DiskInode::decode(&buf))
    }

    /// Always writes the whole record
    pub fn write_at(&self, store: &BlockStore, pos: InodePos, inode: &DiskInode) -> Result<()> {
        log::trace!("inode write at {:?}: free={} size={}", pos, inode.free, inode.size);
        store.write_at(pos.offset(store.block_size()), &inode.encode())
    }

    /// Every slot in scan order: block, then slot
    pub fn iter<'a>(
        &'a self,
        store: &'a BlockStore,
    ) -> impl Iterator<Item = Result<(InodePos, DiskInode)>> + 'a {
        (self.start_block..self.end_block).flat_map(move |block_id| {
            let records = store.read_block(block_id).map(|block| {
                (0..self.inodes_per_block)
                    .map(|slot| {
                        let start = slot * DISK_INODE_SIZE;
                        let inode = DiskInode::decode(&block[start..start + DISK_INODE_SIZE]);
                        Ok((InodePos { block_id, slot }, inode))
                    })
                    .collect::<Vec<_>>()
            });
            match records {
                Ok(records) => records,
                Err(e) => vec![Err(e)],
            }
        })
    }

    /// Live inodes in scan order
    pub fn live<'a>(
        &'a self,
        store: &'a BlockStore,
    ) -> impl Iterator<Item = Result<(InodePos, DiskInode)>> + 'a {
        self.iter(store)
            .filter(|entry| !matches!(entry, Ok((_, inode)) if inode.free))
    }

    pub fn find_by_name(&self, store: &BlockStore, name: &str) -> Result<Option<(InodePos, DiskInode)>> {
        for entry in self.live(store) {
            let (pos, inode) = entry?;
            if inode.is_named(name) {
                return Ok(Some((pos, inode)));
            }
        }
        Ok(None)
    }

    pub fn find_free_slot(&self, store: &BlockStore) -> Result<InodePos> {
        for entry in self.iter(store) {
            let (pos, inode) = entry?;
            if inode.free {
                return Ok(pos);
            }
        }
        Err(FsError::NoFreeInode)
    }

    /// Write a free record into every slot
    pub fn reset(&self, store: &BlockStore) -> Result<()> {
        let record = DiskInode::empty().encode();
        let mut block = vec![0u8; store.block_size()];
        for chunk in block.chunks_exact_mut(DISK_INODE_SIZE).take(self.inodes_per_block) {
            chunk.copy_from_slice(&record);
        }
        for block_id in self.start_block..self.end_block {
            store.write_block(block_id, &block)?;
        }
        Ok(())
    }
}
