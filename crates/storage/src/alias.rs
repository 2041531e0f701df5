//! Alias list
//!
//! An append-only array of 8-byte slots, each holding a record Location.
//! A slot's own file offset is its [`AliasRef`]: it never changes, so an
//! index that stores AliasRefs survives records moving in the record store.
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | length: u64 LE   |  slots ever issued
//! +------------------+
//! | slot 0: u64 LE   |  Location, or 0 once removed
//! | slot 1: u64 LE   |
//! | ...              |
//! +------------------+
//! ```
//!
//! Removed slots are zeroed but never handed out again.

use burrow_core::{AliasRef, Error, Location, Result, ALIAS_HEADER_SIZE, SLOT_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, trace};

use crate::file::StorageFile;
use crate::header::{FileState, Header, LockedFile};
use crate::resolver::Resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AliasHeader {
    length: u64,
}

impl Header for AliasHeader {
    const SIZE: usize = ALIAS_HEADER_SIZE as usize;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.length);
    }

    fn decode(buf: &[u8]) -> Self {
        AliasHeader {
            length: LittleEndian::read_u64(&buf[0..8]),
        }
    }
}

/// Stable identifiers for relocatable records
pub struct AliasList {
    file: LockedFile<AliasHeader>,
}

impl AliasList {
    /// Initialize an empty alias list in `file`, discarding its contents
    pub fn create(mut file: Box<dyn StorageFile>) -> Result<Self> {
        file.set_len(0)?;
        let header = AliasHeader { length: 0 };
        header.write_to(file.as_mut())?;
        info!("Created alias list");
        Ok(Self {
            file: LockedFile::new(file, header),
        })
    }

    /// Open an existing alias list
    pub fn open(mut file: Box<dyn StorageFile>) -> Result<Self> {
        let len = file.len()?;
        if len < ALIAS_HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "alias list is {} bytes, shorter than its header",
                len
            )));
        }
        let header = AliasHeader::read_from(file.as_mut())?;
        if ALIAS_HEADER_SIZE + header.length * SLOT_SIZE > len {
            return Err(Error::Corruption(format!(
                "alias list claims {} slots but holds {} bytes",
                header.length, len
            )));
        }
        info!(slots = header.length, "Opened alias list");
        Ok(Self {
            file: LockedFile::new(file, header),
        })
    }

    /// Append a slot holding `loc` and return its stable reference
    pub fn add(&self, loc: Location) -> Result<AliasRef> {
        let mut guard = self.file.lock();
        let offset = ALIAS_HEADER_SIZE + guard.header.length * SLOT_SIZE;
        write_slot(&mut guard, offset, loc.offset())?;
        guard.header.length += 1;
        trace!(alias = offset, location = %loc, "Added alias");
        Ok(AliasRef::new(offset))
    }

    /// The Location an alias currently points at
    ///
    /// `Ok(None)` if the alias was removed or was never issued.
    pub fn deref(&self, alias: AliasRef) -> Result<Option<Location>> {
        let mut guard = self.file.lock();
        if !issued(&guard, alias) {
            return Ok(None);
        }
        let raw = read_slot(&mut guard, alias.offset())?;
        Ok((raw != 0).then(|| Location::new(raw)))
    }

    /// Point an alias at a new Location
    ///
    /// Returns `Ok(false)` if the alias was never issued.
    pub fn update(&self, alias: AliasRef, loc: Location) -> Result<bool> {
        let mut guard = self.file.lock();
        if !issued(&guard, alias) {
            return Ok(false);
        }
        write_slot(&mut guard, alias.offset(), loc.offset())?;
        trace!(%alias, location = %loc, "Updated alias");
        Ok(true)
    }

    /// Clear an alias. The slot is not reused.
    ///
    /// Returns `Ok(false)` if the alias was never issued.
    pub fn remove(&self, alias: AliasRef) -> Result<bool> {
        let mut guard = self.file.lock();
        if !issued(&guard, alias) {
            return Ok(false);
        }
        write_slot(&mut guard, alias.offset(), 0)?;
        debug!(%alias, "Removed alias");
        Ok(true)
    }

    /// Number of slots ever issued, live or removed
    pub fn len(&self) -> u64 {
        self.file.lock().header.length
    }

    /// True if no alias was ever issued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live alias with its Location, in slot order
    pub fn iter_live(&self) -> Result<Vec<(AliasRef, Location)>> {
        let mut guard = self.file.lock();
        let count = guard.header.length as usize;
        let mut buf = vec![0u8; count * SLOT_SIZE as usize];
        guard.file.read_at(ALIAS_HEADER_SIZE, &mut buf)?;
        Ok(buf
            .chunks_exact(SLOT_SIZE as usize)
            .enumerate()
            .filter_map(|(i, cell)| {
                let raw = LittleEndian::read_u64(cell);
                (raw != 0).then(|| {
                    (
                        AliasRef::new(ALIAS_HEADER_SIZE + i as u64 * SLOT_SIZE),
                        Location::new(raw),
                    )
                })
            })
            .collect())
    }

    /// Write the header and sync the file
    pub fn flush_header(&self) -> Result<()> {
        self.file.lock().flush()
    }

    /// Flush and release the file
    pub fn close(self) -> Result<()> {
        self.file.into_inner().flush()
    }
}

impl Resolver<AliasRef> for AliasList {
    fn resolve(&self, pointer: AliasRef) -> Result<Option<Location>> {
        self.deref(pointer)
    }
}

fn issued(state: &FileState<AliasHeader>, alias: AliasRef) -> bool {
    let offset = alias.offset();
    offset >= ALIAS_HEADER_SIZE
        && (offset - ALIAS_HEADER_SIZE) % SLOT_SIZE == 0
        && (offset - ALIAS_HEADER_SIZE) / SLOT_SIZE < state.header.length
}

fn read_slot(state: &mut FileState<AliasHeader>, offset: u64) -> Result<u64> {
    let mut buf = [0u8; SLOT_SIZE as usize];
    state.file.read_at(offset, &mut buf)?;
    Ok(LittleEndian::read_u64(&buf))
}

fn write_slot(state: &mut FileState<AliasHeader>, offset: u64, value: u64) -> Result<()> {
    let mut buf = [0u8; SLOT_SIZE as usize];
    LittleEndian::write_u64(&mut buf, value);
    state.file.write_at(offset, &buf)?;
    Ok(())
}
