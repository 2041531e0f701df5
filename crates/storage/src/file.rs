//! Positioned file I/O
//!
//! Every storage component talks to its file through [`StorageFile`], which
//! exposes only what the on-disk structures need: read and write at an offset,
//! length queries, truncation, and sync.
//!
//! - [`DiskFile`]: a regular file on disk
//! - [`MemoryFile`]: a growable in-memory buffer, for tests and ephemeral use

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Positioned read/write access to a single file
pub trait StorageFile: Send {
    /// Read exactly `buf.len()` bytes at `offset`
    ///
    /// Reading past end-of-file is an `UnexpectedEof` error.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` at `offset`, extending the file if needed
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Current file length in bytes
    fn len(&self) -> io::Result<u64>;

    /// Truncate or zero-extend the file to `len` bytes
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Flush buffered data to durable storage
    fn sync(&mut self) -> io::Result<()>;

    /// True if the file is empty
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read at `offset`, treating bytes past end-of-file as zero
    ///
    /// Used by structures whose files grow lazily: a cell that was never
    /// written reads as empty.
    fn read_at_or_zero(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let len = self.len()?;
        buf.fill(0);
        if offset >= len {
            return Ok(());
        }
        let available = ((len - offset) as usize).min(buf.len());
        self.read_at(offset, &mut buf[..available])
    }
}

/// A [`StorageFile`] backed by a file on disk
pub struct DiskFile {
    file: File,
    path: PathBuf,
}

impl DiskFile {
    /// Create a new, empty file, truncating any existing one
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!(path = %path.display(), "Created storage file");
        Ok(Self { file, path })
    }

    /// Open an existing file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!(path = %path.display(), "Opened storage file");
        Ok(Self { file, path })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageFile for DiskFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}

/// A [`StorageFile`] held entirely in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryFile {
    data: Vec<u8>,
}

impl MemoryFile {
    /// Create an empty in-memory file
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw contents, for inspection in tests
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl StorageFile for MemoryFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read of {} bytes at {} past end of file", buf.len(), offset),
                )
            })?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}
