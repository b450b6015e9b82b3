use crate::config::{
    BITMAP_START_BLOCK, BLOCKS_PER_INODE, DIRECT_BLOCK_CNT, DISK_INODE_SIZE, FLAT_FS_MAGIC,
    MAX_NAME_LEN, MIN_BLOCK_SIZE, NAME_FIELD_LEN, SUPER_BLOCK_SIZE, UNUSED_BLOCK,
};
use crate::error::{FsError, Result};

/// Block 0 of the device. All fields little-endian u64, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// first block of the data region
    pub initial_block: u64,
    pub bitmap_block_pos: u64,
    pub inode_table_start_block: u64,
    pub inodes_per_block: u64,
    pub block_size: u64,
    pub magic: u64,
}

impl SuperBlock {
    /// Compute the layout of a fresh device
    pub fn new(block_size: usize, block_count: usize) -> Result<Self> {
        if block_size == 0 || block_count == 0 {
            return Err(FsError::InvalidGeometry(
                "block size and block count must be non-zero".into(),
            ));
        }
        if block_size < MIN_BLOCK_SIZE {
            return Err(FsError::InvalidGeometry(format!(
                "block size {} is smaller than one inode record ({} bytes)",
                block_size, MIN_BLOCK_SIZE
            )));
        }
        let bits_per_block = block_size * 8;
        let bitmap_blocks = (block_count + bits_per_block - 1) / bits_per_block;
        let inodes_per_block = block_size / DISK_INODE_SIZE;
        let inode_num = ((block_count + BLOCKS_PER_INODE - 1) / BLOCKS_PER_INODE).max(1);
        let inode_blocks = (inode_num + inodes_per_block - 1) / inodes_per_block;

        let inode_table_start_block = BITMAP_START_BLOCK + bitmap_blocks;
        let initial_block = inode_table_start_block + inode_blocks;
        if initial_block >= block_count {
            return Err(FsError::InvalidGeometry(format!(
                "{} blocks leave no room for data after {} metadata blocks",
                block_count, initial_block
            )));
        }
        Ok(Self {
            initial_block: initial_block as u64,
            bitmap_block_pos: BITMAP_START_BLOCK as u64,
            inode_table_start_block: inode_table_start_block as u64,
            inodes_per_block: inodes_per_block as u64,
            block_size: block_size as u64,
            magic: FLAT_FS_MAGIC,
        })
    }

    pub fn encode(&self) -> [u8; SUPER_BLOCK_SIZE] {
        let mut buf = [0u8; SUPER_BLOCK_SIZE];
        let fields = [
            self.initial_block,
            self.bitmap_block_pos,
            self.inode_table_start_block,
            self.inodes_per_block,
            self.block_size,
            self.magic,
        ];
        for (chunk, field) in buf.chunks_exact_mut(8).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8; SUPER_BLOCK_SIZE]) -> Self {
        let field = |i: usize| read_u64(&buf[i * 8..]);
        Self {
            initial_block: field(0),
            bitmap_block_pos: field(1),
            inode_table_start_block: field(2),
            inodes_per_block: field(3),
            block_size: field(4),
            magic: field(5),
        }
    }

    /// Check the stored layout against a medium of `storage_len` bytes.
    /// Returns the block count of the device.
    pub fn validate(&self, storage_len: u64) -> Result<usize> {
        let bad = |reason: String| Err(FsError::NotAFilesystem(reason));
        if self.magic != FLAT_FS_MAGIC {
            return bad(format!("bad magic {:#018x}", self.magic));
        }
        if self.block_size < MIN_BLOCK_SIZE as u64 {
            return bad(format!("block size {} is too small", self.block_size));
        }
        if self.block_size > storage_len {
            return bad(format!(
                "block size {} exceeds the {} byte medium",
                self.block_size, storage_len
            ));
        }
        if self.inodes_per_block != self.block_size / DISK_INODE_SIZE as u64 {
            return bad(format!(
                "{} inodes per block does not match block size {}",
                self.inodes_per_block, self.block_size
            ));
        }
        let block_count = storage_len / self.block_size;
        let bitmap_blocks = self.inode_table_start_block.saturating_sub(self.bitmap_block_pos);
        let bitmap_bits = self
            .block_size
            .checked_mul(8)
            .and_then(|bits| bits.checked_mul(bitmap_blocks));
        if self.bitmap_block_pos != BITMAP_START_BLOCK as u64
            || bitmap_blocks == 0
            || self.inode_table_start_block >= self.initial_block
            || self.initial_block >= block_count
            || bitmap_bits.map_or(true, |bits| bits < block_count)
        {
            return bad(format!(
                "layout (bitmap {}, inodes {}, data {}) does not fit {} blocks",
                self.bitmap_block_pos, self.inode_table_start_block, self.initial_block, block_count
            ));
        }
        Ok(block_count as usize)
    }

    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    pub fn data_start(&self) -> usize {
        self.initial_block as usize
    }

    pub fn bitmap_blocks(&self) -> usize {
        (self.inode_table_start_block - self.bitmap_block_pos) as usize
    }

    pub fn inode_blocks(&self) -> usize {
        (self.initial_block - self.inode_table_start_block) as usize
    }
}

/// One file record. Encoded as
/// `name[64] | direct[8] (i64) | size (u64) | free (u8)`, 137 bytes, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInode {
    name: [u8; NAME_FIELD_LEN],
    pub direct: [i64; DIRECT_BLOCK_CNT],
    pub size: u64,
    pub free: bool,
}

impl DiskInode {
    /// A free slot
    pub fn empty() -> Self {
        Self {
            name: [0u8; NAME_FIELD_LEN],
            direct: [UNUSED_BLOCK; DIRECT_BLOCK_CNT],
            size: 0,
            free: true,
        }
    }

    /// A live, empty file named `name`. The name must already be validated.
    pub fn new(name: &str) -> Self {
        let mut inode = Self::empty();
        inode.name[..name.len()].copy_from_slice(name.as_bytes());
        inode.free = false;
        inode
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME_LEN)
            .min(MAX_NAME_LEN);
        &self.name[..len]
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }

    /// Block held at `pos`, if any
    pub fn block_at(&self, pos: usize) -> Option<usize> {
        match self.direct[pos] {
            id if id < 0 => None,
            id => Some(id as usize),
        }
    }

    pub fn set_block(&mut self, pos: usize, block_id: Option<usize>) {
        self.direct[pos] = block_id.map_or(UNUSED_BLOCK, |id| id as i64);
    }

    /// Every populated direct pointer, in pointer order
    pub fn blocks(&self) -> impl Iterator<Item = usize> + '_ {
        (0..DIRECT_BLOCK_CNT).filter_map(move |pos| self.block_at(pos))
    }

    pub fn encode(&self) -> [u8; DISK_INODE_SIZE] {
        let mut buf = [0u8; DISK_INODE_SIZE];
        buf[..NAME_FIELD_LEN].copy_from_slice(&self.name);
        // terminator is always present on disk
        buf[MAX_NAME_LEN] = 0;
        let mut off = NAME_FIELD_LEN;
        for id in self.direct {
            buf[off..off + 8].copy_from_slice(&id.to_le_bytes());
            off += 8;
        }
        buf[off..off + 8].copy_from_slice(&self.size.to_le_bytes());
        buf[off + 8] = self.free as u8;
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; NAME_FIELD_LEN];
        name.copy_from_slice(&buf[..NAME_FIELD_LEN]);
        let mut direct = [UNUSED_BLOCK; DIRECT_BLOCK_CNT];
        let mut off = NAME_FIELD_LEN;
        for id in direct.iter_mut() {
            *id = read_u64(&buf[off..]) as i64;
            off += 8;
        }
        Self {
            name,
            direct,
            size: read_u64(&buf[off..]),
            free: buf[off + 8] != 0,
        }
    }
}

/// Blocks needed to hold `size` bytes
pub fn blocks_needed(size: usize, block_size: usize) -> usize {
    size / block_size + (size % block_size != 0) as usize
}

fn read_u64(buf: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_record_is_137_bytes() {
        assert_eq!(DISK_INODE_SIZE, 137);
        assert_eq!(DiskInode::empty().encode().len(), 137);
    }

    #[test]
    fn inode_fields_sit_at_fixed_offsets() {
        let mut inode = DiskInode::new("a.txt");
        inode.set_block(0, Some(9));
        inode.size = 0x0102;
        let buf = inode.encode();
        assert_eq!(&buf[..6], b"a.txt\0");
        assert_eq!(&buf[64..72], &9i64.to_le_bytes());
        assert_eq!(&buf[72..80], &(-1i64).to_le_bytes());
        assert_eq!(&buf[128..136], &0x0102u64.to_le_bytes());
        assert_eq!(buf[136], 0);
        assert_eq!(DiskInode::decode(&buf), inode);
        assert_eq!(DiskInode::empty().encode()[136], 1);
    }

    #[test]
    fn name_stops_at_terminator() {
        let long = "x".repeat(MAX_NAME_LEN);
        let inode = DiskInode::new(&long);
        assert_eq!(inode.name(), long);
        assert!(inode.is_named(&long));
        assert!(!inode.is_named("x"));
        let decoded = DiskInode::decode(&inode.encode());
        assert_eq!(decoded.name_bytes().len(), MAX_NAME_LEN);
    }

    #[test]
    fn small_device_layout() {
        let sb = SuperBlock::new(137, 20).unwrap();
        assert_eq!(sb.bitmap_block_pos, 1);
        assert_eq!(sb.inode_table_start_block, 2);
        assert_eq!(sb.inodes_per_block, 1);
        // 20 blocks -> 5 inodes -> 5 inode blocks
        assert_eq!(sb.initial_block, 7);
        assert_eq!(sb.validate(137 * 20).unwrap(), 20);
    }

    #[test]
    fn bitmap_region_grows_with_device() {
        let sb = SuperBlock::new(512, 8192).unwrap();
        assert_eq!(sb.bitmap_blocks(), 2);
        assert_eq!(sb.inode_table_start_block, 3);
        assert_eq!(sb.inodes_per_block, 3);
        assert_eq!(sb.inode_blocks(), 683);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(SuperBlock::new(0, 10), Err(FsError::InvalidGeometry(_))));
        assert!(matches!(SuperBlock::new(137, 0), Err(FsError::InvalidGeometry(_))));
        assert!(matches!(SuperBlock::new(136, 100), Err(FsError::InvalidGeometry(_))));
        assert!(matches!(SuperBlock::new(137, 3), Err(FsError::InvalidGeometry(_))));
    }

    #[test]
    fn superblock_field_order() {
        let sb = SuperBlock::new(137, 20).unwrap();
        let buf = sb.encode();
        assert_eq!(&buf[..8], &7u64.to_le_bytes());
        assert_eq!(&buf[8..16], &1u64.to_le_bytes());
        assert_eq!(&buf[16..24], &2u64.to_le_bytes());
        assert_eq!(&buf[24..32], &1u64.to_le_bytes());
        assert_eq!(SuperBlock::decode(&buf), sb);
    }

    #[test]
    fn validate_rejects_foreign_images() {
        let zero = SuperBlock::decode(&[0u8; SUPER_BLOCK_SIZE]);
        assert!(matches!(zero.validate(4096), Err(FsError::NotAFilesystem(_))));
        let sb = SuperBlock::new(137, 20).unwrap();
        // image truncated below the data region
        assert!(matches!(sb.validate(137 * 7), Err(FsError::NotAFilesystem(_))));
    }

    #[test]
    fn validate_rejects_huge_block_size() {
        let block_size = 1u64 << 62;
        let sb = SuperBlock {
            initial_block: 7,
            bitmap_block_pos: 1,
            inode_table_start_block: 2,
            inodes_per_block: block_size / DISK_INODE_SIZE as u64,
            block_size,
            magic: FLAT_FS_MAGIC,
        };
        assert!(matches!(sb.validate(137 * 20), Err(FsError::NotAFilesystem(_))));
        assert!(matches!(sb.validate(u64::MAX), Err(FsError::NotAFilesystem(_))));
    }

    #[test]
    fn blocks_needed_rounds_up_without_overflow() {
        assert_eq!(blocks_needed(0, 137), 0);
        assert_eq!(blocks_needed(137, 137), 1);
        assert_eq!(blocks_needed(138, 137), 2);
        assert_eq!(blocks_needed(usize::MAX, 137), usize::MAX / 137 + 1);
    }
}
