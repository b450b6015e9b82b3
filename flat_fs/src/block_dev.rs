use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use spin::Mutex;

/// Backing medium of a device.
/// Byte-addressed and positioned: no cursor survives between calls.
pub trait Storage: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
    /// total length of the medium in bytes
    fn len(&self) -> io::Result<u64>;
    fn sync(&self) -> io::Result<()>;
}

/// A host file used as the device image
pub struct FileStorage(Mutex<File>);

impl FileStorage {
    /// Create (or truncate) `path` and size it to `len` zero bytes
    pub fn create<P: AsRef<Path>>(path: P, len: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len)?;
        Ok(Self(Mutex::new(file)))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Mutex::new(file)))
    }
}

impl Storage for FileStorage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.0.lock().metadata()?.len())
    }

    fn sync(&self) -> io::Result<()> {
        let mut file = self.0.lock();
        file.flush()?;
        file.sync_all()
    }
}

/// Fixed-length in-memory image, zero-filled at creation
pub struct MemStorage(Mutex<Vec<u8>>);

impl MemStorage {
    pub fn new(len: usize) -> Self {
        Self(Mutex::new(vec![0u8; len]))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Mutex::new(bytes))
    }

    fn range(len: usize, offset: u64, size: usize) -> io::Result<core::ops::Range<usize>> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "offset too large"))?;
        match start.checked_add(size) {
            Some(end) if end <= len => Ok(start..end),
            _ => Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "access past the end of the memory image",
            )),
        }
    }
}

impl Storage for MemStorage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.0.lock();
        let range = Self::range(data.len(), offset, buf.len())?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut data = self.0.lock();
        let range = Self::range(data.len(), offset, buf.len())?;
        data[range].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.0.lock().len() as u64)
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}
