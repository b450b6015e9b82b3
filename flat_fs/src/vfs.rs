use crate::config::{DIRECT_BLOCK_CNT, MAX_NAME_LEN};
use crate::error::{FsError, Result};
use crate::fs::FlatFileSystem;
use crate::inode_table::InodePos;
use crate::layout::{blocks_needed, DiskInode};
use log::{debug, info};

/// File-level operations composed from the inode table, the bitmap and
/// raw block I/O
impl FlatFileSystem {
    pub fn max_file_size(&self) -> usize {
        DIRECT_BLOCK_CNT * self.block_size()
    }

    fn lookup(&self, name: &str) -> Result<(InodePos, DiskInode)> {
        self.inode_table
            .find_by_name(&self.store, name)?
            .ok_or_else(|| FsError::FileNotFound(name.into()))
    }

    /// Create `name` or replace its content.
    ///
    /// Data blocks are written before the inode, so a failure part way
    /// never leaves a visible inode pointing at unwritten blocks. Blocks
    /// allocated by a failed call are released again when possible.
    pub fn write_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        validate_name(name)?;
        let block_size = self.block_size();
        let needed = blocks_needed(content.len(), block_size);
        if needed > DIRECT_BLOCK_CNT {
            return Err(FsError::FileTooLarge {
                len: content.len(),
                max: self.max_file_size(),
            });
        }

        let (pos, mut inode) = match self.inode_table.find_by_name(&self.store, name)? {
            Some(found) => found,
            None => (
                self.inode_table.find_free_slot(&self.store)?,
                DiskInode::new(name),
            ),
        };

        let mut fresh = Vec::new();
        for ptr in 0..needed {
            if inode.block_at(ptr).map_or(false, |id| self.is_data_block(id)) {
                continue;
            }
            match self.alloc_data_block() {
                Ok(Some(block_id)) => {
                    inode.set_block(ptr, Some(block_id));
                    fresh.push(block_id);
                }
                Ok(None) => {
                    self.release(&fresh);
                    return Err(FsError::DeviceFull);
                }
                Err(e) => {
                    self.release(&fresh);
                    return Err(e);
                }
            }
        }

        for (ptr, chunk) in content.chunks(block_size).enumerate() {
            // every position below `needed` holds a data block by now
            let block_id = inode.block_at(ptr).ok_or_else(|| FsError::CorruptInode {
                name: name.into(),
                reason: format!("pointer {} unset after allocation", ptr),
            })?;
            if let Err(e) = self.store.write_block(block_id, chunk) {
                self.release(&fresh);
                return Err(e);
            }
        }

        // shrinking: surplus pointers leave the record before their blocks are freed
        let surplus: Vec<usize> = (needed..DIRECT_BLOCK_CNT)
            .filter_map(|ptr| {
                let block_id = inode.block_at(ptr);
                inode.set_block(ptr, None);
                block_id
            })
            .collect();

        inode.size = content.len() as u64;
        inode.free = false;
        if let Err(e) = self.inode_table.write_at(&self.store, pos, &inode) {
            self.release(&fresh);
            return Err(e);
        }
        for block_id in surplus {
            if self.is_data_block(block_id) {
                self.dealloc_data_block(block_id)?;
            }
        }
        debug!(
            "wrote {} bytes to {} ({} new blocks) at {:?}",
            content.len(),
            name,
            fresh.len(),
            pos
        );
        Ok(())
    }

    /// Best-effort rollback of blocks handed out during a failed write.
    /// Anything that cannot be released stays allocated: a leak, fixed by repair.
    fn release(&mut self, blocks: &[usize]) {
        for &block_id in blocks {
            if let Err(e) = self.dealloc_data_block(block_id) {
                log::warn!("could not roll back block {}: {}", block_id, e);
            }
        }
    }

    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let (_, inode) = self.lookup(name)?;
        let block_size = self.block_size();
        let size = inode.size as usize;
        let needed = blocks_needed(size, block_size);
        if needed > DIRECT_BLOCK_CNT {
            return Err(FsError::CorruptInode {
                name: name.into(),
                reason: format!("size {} exceeds direct capacity", size),
            });
        }
        let mut content = Vec::with_capacity(size);
        for ptr in 0..needed {
            let block_id = inode
                .block_at(ptr)
                .filter(|&id| self.is_data_block(id))
                .ok_or_else(|| FsError::CorruptInode {
                    name: name.into(),
                    reason: format!("pointer {} is {}", ptr, inode.direct[ptr]),
                })?;
            let block = self.store.read_block(block_id)?;
            let take = (size - content.len()).min(block_size);
            content.extend_from_slice(&block[..take]);
        }
        Ok(content)
    }

    pub fn remove_file(&mut self, name: &str) -> Result<()> {
        let (pos, mut inode) = self.lookup(name)?;
        let held: Vec<usize> = inode.blocks().collect();
        for ptr in 0..DIRECT_BLOCK_CNT {
            inode.set_block(ptr, None);
        }
        inode.free = true;
        inode.size = 0;
        self.inode_table.write_at(&self.store, pos, &inode)?;
        for block_id in held {
            if self.is_data_block(block_id) {
                self.dealloc_data_block(block_id)?;
            }
        }
        info!("removed {}", name);
        Ok(())
    }

    /// (name, size) of every file, in inode-table order
    pub fn list_files(&self) -> Result<Vec<(String, usize)>> {
        self.inode_table
            .live(&self.store)
            .map(|entry| entry.map(|(_, inode)| (inode.name(), inode.size as usize)))
            .collect()
    }

    pub fn file_size(&self, name: &str) -> Result<usize> {
        Ok(self.lookup(name)?.1.size as usize)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.as_bytes().contains(&0) {
        return Err(FsError::InvalidName(name.into()));
    }
    Ok(())
}
