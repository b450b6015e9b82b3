//! A single-image block device hosting a flat filesystem:
//! superblock, free-block bitmap, fixed inode table, data region.

pub mod config;

mod bitmap;
mod block_dev;
mod block_store;
mod device;
mod error;
mod fs;
mod inode_table;
mod layout;
mod vfs;

pub use bitmap::BlockBitmap;
pub use block_dev::{FileStorage, MemStorage, Storage};
pub use block_store::BlockStore;
pub use device::BlockDevice;
pub use error::{FsError, Result};
pub use fs::{DeviceInfo, FlatFileSystem};
pub use inode_table::{InodePos, InodeTable};
pub use layout::{DiskInode, SuperBlock};
