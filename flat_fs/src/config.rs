/// superblock lives in the first block of the device
pub const SUPER_BLOCK_ID: usize = 0;
/// the free-block bitmap region always starts right after the superblock
pub const BITMAP_START_BLOCK: usize = 1;

/// "\x01FLATFS\0" read as a little-endian u64
pub const FLAT_FS_MAGIC: u64 = 0x0053_4654_414c_4601;

/// bytes reserved for an inode name, terminator included
pub const NAME_FIELD_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;

/// number of direct block pointers in one inode
pub const DIRECT_BLOCK_CNT: usize = 8;
/// marks an unused direct pointer
pub const UNUSED_BLOCK: i64 = -1;

/// name[64] + direct[8] (i64) + size (u64) + free (u8)
pub const DISK_INODE_SIZE: usize = NAME_FIELD_LEN + DIRECT_BLOCK_CNT * 8 + 8 + 1;
/// six u64 fields
pub const SUPER_BLOCK_SIZE: usize = 6 * 8;

/// one inode is provisioned for every BLOCKS_PER_INODE blocks of the device
pub const BLOCKS_PER_INODE: usize = 4;

/// smallest block size able to hold one inode record
pub const MIN_BLOCK_SIZE: usize = DISK_INODE_SIZE;
