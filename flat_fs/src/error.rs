use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FsError {
    #[error("No block device is open")]
    DeviceNotOpen,
    #[error("Block {index} is out of range, the device has {block_count} blocks")]
    BlockOutOfRange { index: usize, block_count: usize },
    #[error("{len} bytes do not fit in a block of {block_size} bytes")]
    DataTooLarge { len: usize, block_size: usize },
    #[error("No free inode left in the inode table")]
    NoFreeInode,
    #[error("No free data block left on the device")]
    DeviceFull,
    #[error("File {0} not found")]
    FileNotFound(String),
    #[error("{len} bytes exceed the maximum file size of {max} bytes")]
    FileTooLarge { len: usize, max: usize },
    #[error("Not a flat_fs image: {0}")]
    NotAFilesystem(String),
    #[error("Invalid device geometry: {0}")]
    InvalidGeometry(String),
    #[error("Invalid file name {0:?}")]
    InvalidName(String),
    #[error("Inode of {name} is corrupted: {reason}")]
    CorruptInode { name: String, reason: String },
    #[error("I/O failure on the backing storage")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, FsError>;
