//! File headers and the scoped header guard
//!
//! Each structure caches its file header in memory next to the file handle,
//! both behind one `parking_lot::Mutex`. Operations reach that state through a
//! [`HeaderGuard`], which remembers the header as it was when the lock was
//! taken and writes it back when the guard drops if it changed. A mutation
//! therefore persists its header on every exit path, including `?` returns
//! and unwinding.

use burrow_core::Result;
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use tracing::error;

use crate::file::StorageFile;

/// A fixed-size header stored at offset 0 of a structure's file
pub(crate) trait Header: Copy + PartialEq + std::fmt::Debug {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Encode into exactly `SIZE` bytes
    fn encode(&self, buf: &mut [u8]);

    /// Decode from exactly `SIZE` bytes
    fn decode(buf: &[u8]) -> Self;

    /// Read the header from the start of `file`
    fn read_from(file: &mut dyn StorageFile) -> Result<Self> {
        let mut buf = vec![0u8; Self::SIZE];
        file.read_at(0, &mut buf)?;
        Ok(Self::decode(&buf))
    }

    /// Write the header to the start of `file`
    fn write_to(&self, file: &mut dyn StorageFile) -> Result<()> {
        let mut buf = vec![0u8; Self::SIZE];
        self.encode(&mut buf);
        file.write_at(0, &buf)?;
        Ok(())
    }
}

/// File handle plus its cached header
pub(crate) struct FileState<H> {
    pub file: Box<dyn StorageFile>,
    pub header: H,
}

impl<H: Header> FileState<H> {
    /// Write the header and sync the file
    pub fn flush(&mut self) -> Result<()> {
        self.header.write_to(self.file.as_mut())?;
        self.file.sync()?;
        Ok(())
    }
}

/// Lock around a structure's [`FileState`]
pub(crate) struct LockedFile<H> {
    state: Mutex<FileState<H>>,
}

impl<H: Header> LockedFile<H> {
    pub fn new(file: Box<dyn StorageFile>, header: H) -> Self {
        Self {
            state: Mutex::new(FileState { file, header }),
        }
    }

    /// Block until the lock is held
    pub fn lock(&self) -> HeaderGuard<'_, H> {
        let guard = self.state.lock();
        let original = guard.header;
        HeaderGuard { guard, original }
    }

    /// Take the state back out, e.g. on close
    pub fn into_inner(self) -> FileState<H> {
        self.state.into_inner()
    }
}

/// Locked access to a structure's file and header
///
/// Persists the header on drop if it was modified while held.
pub(crate) struct HeaderGuard<'a, H: Header> {
    guard: MutexGuard<'a, FileState<H>>,
    original: H,
}

impl<H: Header> HeaderGuard<'_, H> {
    /// Persist the header now if it changed, and rebase the drop check on it
    pub fn persist(&mut self) -> Result<()> {
        if self.guard.header != self.original {
            let header = self.guard.header;
            header.write_to(self.guard.file.as_mut())?;
            self.original = header;
        }
        Ok(())
    }
}

impl<H: Header> Deref for HeaderGuard<'_, H> {
    type Target = FileState<H>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<H: Header> DerefMut for HeaderGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<H: Header> Drop for HeaderGuard<'_, H> {
    fn drop(&mut self) {
        if let Err(e) = self.persist() {
            error!(error = %e, header = ?self.guard.header, "Failed to persist header");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;
    use byteorder::{ByteOrder, LittleEndian};

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Counter {
        value: u64,
    }

    impl Header for Counter {
        const SIZE: usize = 8;

        fn encode(&self, buf: &mut [u8]) {
            LittleEndian::write_u64(buf, self.value);
        }

        fn decode(buf: &[u8]) -> Self {
            Counter {
                value: LittleEndian::read_u64(buf),
            }
        }
    }

    fn stored(locked: &LockedFile<Counter>) -> u64 {
        let mut guard = locked.lock();
        Counter::read_from(guard.file.as_mut()).unwrap().value
    }

    #[test]
    fn test_guard_persists_on_drop() {
        let mut file = MemoryFile::new();
        Counter { value: 1 }.write_to(&mut file).unwrap();
        let locked = LockedFile::new(Box::new(file), Counter { value: 1 });

        {
            let mut guard = locked.lock();
            guard.header.value = 7;
        }
        assert_eq!(stored(&locked), 7);
    }

    #[test]
    fn test_guard_persists_on_early_return() {
        fn fails(locked: &LockedFile<Counter>) -> Result<()> {
            let mut guard = locked.lock();
            guard.header.value = 42;
            Err(burrow_core::Error::Corruption("boom".to_string()))
        }

        let mut file = MemoryFile::new();
        Counter { value: 0 }.write_to(&mut file).unwrap();
        let locked = LockedFile::new(Box::new(file), Counter { value: 0 });

        assert!(fails(&locked).is_err());
        assert_eq!(stored(&locked), 42);
    }

    #[test]
    fn test_unchanged_header_is_not_written() {
        let locked = LockedFile::new(Box::new(MemoryFile::new()), Counter { value: 5 });
        {
            let guard = locked.lock();
            assert_eq!(guard.header.value, 5);
        }
        let state = locked.into_inner();
        assert!(state.file.is_empty().unwrap());
    }
}
