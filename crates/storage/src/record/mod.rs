//! Record store
//!
//! A variable-length, multi-field record allocator backed by one file.
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | free: u64 LE     |  head of the free list (0 = empty)
//! +------------------+
//! | record / free    |  records and free blocks, back to back
//! | block ...        |
//! +------------------+
//! ```
//!
//! A record is a skip table followed by its field bytes (see `codec`). A
//! deleted record becomes a free block in place, which is why every record
//! is at least [`MIN_RECORD_SIZE`] bytes.
//!
//! # Staleness
//!
//! Indexes may hold Locations that no longer point at a live record. Reads
//! bounds-check against the file length and report a missing field rather
//! than reading past the end of the file. A Location that points into the
//! middle of other data is not detected.

mod codec;
mod compaction;
mod free_list;

pub use compaction::{Move, RelocationMap};
pub use free_list::FreeBlock;

use burrow_core::{Error, Location, Record, Result, MIN_RECORD_SIZE, STORE_HEADER_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, trace, warn};

use crate::file::StorageFile;
use crate::header::{FileState, Header, LockedFile};
use codec::SkipTable;

/// Record store file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreHeader {
    /// Offset of the largest free block (0 = none)
    pub free: u64,
}

impl Header for StoreHeader {
    const SIZE: usize = STORE_HEADER_SIZE as usize;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.free);
    }

    fn decode(buf: &[u8]) -> Self {
        StoreHeader {
            free: LittleEndian::read_u64(&buf[0..8]),
        }
    }
}

/// File-backed store of fixed-arity records
///
/// Thread-safe: every operation takes the store's lock for its duration.
pub struct RecordStore {
    field_count: usize,
    file: LockedFile<StoreHeader>,
}

impl RecordStore {
    /// Initialize an empty store in `file`, discarding its contents
    ///
    /// # Panics
    ///
    /// Panics if `field_count` is zero.
    pub fn create(mut file: Box<dyn StorageFile>, field_count: usize) -> Result<Self> {
        assert!(field_count > 0, "record store needs at least one field");
        file.set_len(0)?;
        let header = StoreHeader { free: 0 };
        header.write_to(file.as_mut())?;
        info!(field_count, "Created record store");
        Ok(Self {
            field_count,
            file: LockedFile::new(file, header),
        })
    }

    /// Open a store previously written with the same `field_count`
    ///
    /// # Panics
    ///
    /// Panics if `field_count` is zero.
    pub fn open(mut file: Box<dyn StorageFile>, field_count: usize) -> Result<Self> {
        assert!(field_count > 0, "record store needs at least one field");
        let len = file.len()?;
        if len < STORE_HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "record store is {} bytes, shorter than its header",
                len
            )));
        }
        let header = StoreHeader::read_from(file.as_mut())?;
        info!(field_count, size = len, free = header.free, "Opened record store");
        Ok(Self {
            field_count,
            file: LockedFile::new(file, header),
        })
    }

    /// Number of fields in every record
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Current file size in bytes
    pub fn size(&self) -> Result<u64> {
        let guard = self.file.lock();
        Ok(guard.file.len()?)
    }

    /// Append a record and return its Location
    ///
    /// Reuses a free block when one fits; otherwise extends the file.
    pub fn push<F: AsRef<[u8]>>(&self, fields: &[F]) -> Result<Location> {
        self.check_arity(fields.len())?;
        let size = codec::encoded_size(fields);
        if size < MIN_RECORD_SIZE {
            return Err(Error::RecordTooSmall {
                size,
                min: MIN_RECORD_SIZE,
            });
        }
        let bytes = codec::encode(fields);

        let mut guard = self.file.lock();
        let offset = match free_list::take(&mut guard, size)? {
            Some(offset) => offset,
            None => {
                let end = guard.file.len()?;
                trace!(offset = end, size, "Extending record store");
                end
            }
        };
        guard.file.write_at(offset, &bytes)?;
        Ok(Location::new(offset))
    }

    /// Decode the whole record at `loc`
    ///
    /// `Ok(None)` if the record would extend past end-of-file or its skip
    /// table is malformed.
    pub fn read(&self, loc: Location) -> Result<Option<Record>> {
        let mut guard = self.file.lock();
        let Some(table) = self.read_skip_table(&mut guard, loc)? else {
            return Ok(None);
        };

        let data_start = loc.offset() + codec::skip_table_size(self.field_count);
        let mut data = vec![0u8; table.data_len() as usize];
        guard.file.read_at(data_start, &mut data)?;

        let fields = (0..self.field_count)
            .map(|i| {
                let (start, end) = table.field_range(i);
                data[start as usize..end as usize].to_vec()
            })
            .collect();
        Ok(Some(Record::new(fields)))
    }

    /// Read one field of the record at `loc`
    ///
    /// `Ok(None)` if the field's byte range falls outside the file.
    ///
    /// # Panics
    ///
    /// Panics if `field` is not below the store's field count.
    pub fn read_field(&self, loc: Location, field: usize) -> Result<Option<Vec<u8>>> {
        self.check_field(field);
        let mut guard = self.file.lock();
        let Some((start, end)) = self.locate_field(&mut guard, loc, field)? else {
            return Ok(None);
        };
        let mut buf = vec![0u8; (end - start) as usize];
        guard.file.read_at(start, &mut buf)?;
        Ok(Some(buf))
    }

    /// Overwrite one field in place with a value of the same length
    ///
    /// Returns `Ok(false)` if the record cannot be read.
    ///
    /// # Panics
    ///
    /// Panics if `field` is not below the store's field count.
    pub fn set_field(&self, loc: Location, field: usize, value: &[u8]) -> Result<bool> {
        self.check_field(field);
        let mut guard = self.file.lock();
        let Some((start, end)) = self.locate_field(&mut guard, loc, field)? else {
            return Ok(false);
        };
        if end - start != value.len() as u64 {
            return Err(Error::FieldLengthMismatch {
                field,
                stored: end - start,
                actual: value.len() as u64,
            });
        }
        guard.file.write_at(start, value)?;
        Ok(true)
    }

    /// Release the record at `loc` to the free list
    ///
    /// Returns `Ok(false)` if no record can be decoded there. Deleting the
    /// same Location twice corrupts the free list; callers own that.
    pub fn delete(&self, loc: Location) -> Result<bool> {
        let mut guard = self.file.lock();
        let Some(table) = self.read_skip_table(&mut guard, loc)? else {
            return Ok(false);
        };
        free_list::insert(&mut guard, loc.offset(), table.record_len())?;
        debug!(location = %loc, size = table.record_len(), "Deleted record");
        Ok(true)
    }

    /// Build a new record from `base` with some fields replaced
    ///
    /// When every replacement has the same length as the field it replaces,
    /// the record is updated in place and `base` is returned. Otherwise a new
    /// record is pushed and `base` is left untouched for the caller to delete
    /// once nothing references it. `Ok(None)` if `base` cannot be read.
    pub fn push_updated<F: AsRef<[u8]>>(
        &self,
        base: Location,
        updates: &[(usize, F)],
    ) -> Result<Option<Location>> {
        for (field, _) in updates {
            self.check_field(*field);
        }
        let Some(record) = self.read(base)? else {
            return Ok(None);
        };

        let same_shape = updates
            .iter()
            .all(|(field, value)| record.fields()[*field].len() == value.as_ref().len());
        if same_shape {
            for (field, value) in updates {
                if !self.set_field(base, *field, value.as_ref())? {
                    return Ok(None);
                }
            }
            return Ok(Some(base));
        }

        let mut fields = record.into_fields();
        for (field, value) in updates {
            fields[*field] = value.as_ref().to_vec();
        }
        self.push(&fields).map(Some)
    }

    /// Close every gap left by deleted records and shrink the file
    ///
    /// Invalidates every outstanding Location. The returned map translates
    /// old Locations to new ones; callers holding raw Locations must apply
    /// it (an index that stores AliasRefs only needs its aliases rewritten).
    pub fn compact(&self) -> Result<RelocationMap> {
        let mut guard = self.file.lock();
        compaction::compact(&mut guard)
    }

    /// Snapshot of the free list, largest block first
    pub fn free_blocks(&self) -> Result<Vec<FreeBlock>> {
        let mut guard = self.file.lock();
        free_list::blocks(&mut guard)
    }

    /// Write the header and sync the file
    pub fn flush_header(&self) -> Result<()> {
        self.file.lock().flush()
    }

    /// Flush and release the file
    pub fn close(self) -> Result<()> {
        let mut state = self.file.into_inner();
        state.flush()?;
        debug!("Closed record store");
        Ok(())
    }

    fn check_arity(&self, actual: usize) -> Result<()> {
        if actual != self.field_count {
            return Err(Error::FieldCountMismatch {
                expected: self.field_count,
                actual,
            });
        }
        Ok(())
    }

    fn check_field(&self, field: usize) {
        assert!(
            field < self.field_count,
            "field {} out of range for {}-field store",
            field,
            self.field_count
        );
    }

    fn read_skip_table(
        &self,
        state: &mut FileState<StoreHeader>,
        loc: Location,
    ) -> Result<Option<SkipTable>> {
        let len = state.file.len()?;
        let table_size = codec::skip_table_size(self.field_count);
        if loc.offset() < STORE_HEADER_SIZE || loc.offset().saturating_add(table_size) > len {
            warn!(location = %loc, size = len, "Record location outside store");
            return Ok(None);
        }

        let mut buf = vec![0u8; table_size as usize];
        state.file.read_at(loc.offset(), &mut buf)?;
        let Some(table) = SkipTable::decode(&buf) else {
            warn!(location = %loc, "Malformed skip table");
            return Ok(None);
        };
        if loc.offset().saturating_add(table.record_len()) > len {
            warn!(location = %loc, size = len, "Record runs past end of store");
            return Ok(None);
        }
        Ok(Some(table))
    }

    /// Absolute byte range of `field`, reading only the two skip entries
    /// that bound it
    fn locate_field(
        &self,
        state: &mut FileState<StoreHeader>,
        loc: Location,
        field: usize,
    ) -> Result<Option<(u64, u64)>> {
        let len = state.file.len()?;
        let table_size = codec::skip_table_size(self.field_count);
        if loc.offset() < STORE_HEADER_SIZE || loc.offset().saturating_add(table_size) > len {
            warn!(location = %loc, size = len, "Record location outside store");
            return Ok(None);
        }

        let (prev, skip) = if field == 0 {
            let mut buf = [0u8; 8];
            state.file.read_at(loc.offset(), &mut buf)?;
            (0, LittleEndian::read_u64(&buf))
        } else {
            let mut buf = [0u8; 16];
            state.file.read_at(loc.offset() + (field as u64 - 1) * 8, &mut buf)?;
            (
                LittleEndian::read_u64(&buf[0..8]),
                LittleEndian::read_u64(&buf[8..16]),
            )
        };

        let Some((start, end)) = codec::bounded_range(prev, skip) else {
            warn!(location = %loc, field, "Malformed skip table");
            return Ok(None);
        };
        let data_start = loc.offset() + table_size;
        let (start, end) = match (data_start.checked_add(start), data_start.checked_add(end)) {
            (Some(s), Some(e)) if e <= len => (s, e),
            _ => {
                warn!(location = %loc, field, size = len, "Field runs past end of store");
                return Ok(None);
            }
        };
        Ok(Some((start, end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;

    fn store(fields: usize) -> RecordStore {
        RecordStore::create(Box::new(MemoryFile::new()), fields).unwrap()
    }

    #[test]
    fn test_first_record_follows_header() {
        let store = store(3);
        let loc = store.push(&["alice", "30", "engineer"]).unwrap();
        assert_eq!(loc, Location::new(8));
        assert_eq!(store.size().unwrap(), 8 + 24 + 15);
        assert_eq!(store.read_field(loc, 0).unwrap(), Some(b"alice".to_vec()));
    }

    #[test]
    fn test_record_too_small() {
        let store = store(1);
        let err = store.push(&["tiny"]).unwrap_err();
        assert!(matches!(err, Error::RecordTooSmall { size: 12, min: 16 }));
        assert_eq!(store.size().unwrap(), 8);
    }

    #[test]
    fn test_field_count_mismatch() {
        let store = store(2);
        let err = store.push(&["only-one-field-here"]).unwrap_err();
        assert!(matches!(
            err,
            Error::FieldCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_read_past_end_is_absent() {
        let store = store(2);
        let loc = store.push(&["key", "value"]).unwrap();
        let far = Location::new(loc.offset() + 1000);
        assert_eq!(store.read(far).unwrap(), None);
        assert_eq!(store.read_field(far, 1).unwrap(), None);
        assert_eq!(store.read(Location::new(0)).unwrap(), None);
    }

    #[test]
    fn test_delete_then_push_reuses_offset() {
        let store = store(3);
        let loc = store.push(&["alice", "30", "engineer"]).unwrap();
        let size = store.size().unwrap();
        assert!(store.delete(loc).unwrap());
        assert_eq!(store.free_blocks().unwrap().len(), 1);

        let again = store.push(&["bob", "xy", "engineer!!"]).unwrap();
        assert_eq!(again, loc);
        assert_eq!(store.size().unwrap(), size);
        assert!(store.free_blocks().unwrap().is_empty());
    }

    #[test]
    fn test_split_leaves_residual_on_free_list() {
        let store = store(1);
        let big = store.push(&[vec![1u8; 100]]).unwrap();
        let _tail = store.push(&[vec![2u8; 20]]).unwrap();
        store.delete(big).unwrap();

        // 8 + 40 = 48 bytes out of a 108-byte block leaves 60
        let small = store.push(&[vec![3u8; 40]]).unwrap();
        assert_eq!(small, big);
        let blocks = store.free_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].offset, big.offset() + 48);
        assert_eq!(blocks[0].size, 60);
    }

    #[test]
    fn test_small_residual_is_retained_as_waste() {
        let store = store(1);
        let a = store.push(&[vec![1u8; 20]]).unwrap();
        let _b = store.push(&[vec![2u8; 20]]).unwrap();
        store.delete(a).unwrap();

        // 28-byte block, 18-byte record: 10 bytes cannot hold a free block
        let c = store.push(&[vec![3u8; 10]]).unwrap();
        assert_eq!(c, a);
        assert!(store.free_blocks().unwrap().is_empty());
    }

    #[test]
    fn test_free_list_sorted_descending() {
        let store = store(1);
        let sizes = [30usize, 90, 10, 60];
        let locs: Vec<_> = sizes
            .iter()
            .map(|n| store.push(&[vec![0u8; *n]]).unwrap())
            .collect();
        for loc in &locs {
            store.delete(*loc).unwrap();
        }
        let blocks = store.free_blocks().unwrap();
        let got: Vec<u64> = blocks.iter().map(|b| b.size).collect();
        assert_eq!(got, vec![98, 68, 38, 18]);
    }

    #[test]
    fn test_push_updated_in_place() {
        let store = store(2);
        let loc = store.push(&["key-1", "aaaa"]).unwrap();
        let updated = store.push_updated(loc, &[(1, "bbbb")]).unwrap();
        assert_eq!(updated, Some(loc));
        assert_eq!(store.read_field(loc, 1).unwrap(), Some(b"bbbb".to_vec()));
    }

    #[test]
    fn test_push_updated_copies_on_resize() {
        let store = store(2);
        let loc = store.push(&["key-1", "aaaa"]).unwrap();
        let updated = store.push_updated(loc, &[(1, "longer value")]).unwrap().unwrap();
        assert_ne!(updated, loc);
        let record = store.read(updated).unwrap().unwrap();
        assert_eq!(record.field(0), Some(&b"key-1"[..]));
        assert_eq!(record.field(1), Some(&b"longer value"[..]));
        // base untouched
        assert_eq!(store.read_field(loc, 1).unwrap(), Some(b"aaaa".to_vec()));
    }

    #[test]
    fn test_set_field_length_mismatch() {
        let store = store(2);
        let loc = store.push(&["key-1", "aaaa"]).unwrap();
        let err = store.set_field(loc, 1, b"a").unwrap_err();
        assert!(matches!(err, Error::FieldLengthMismatch { field: 1, .. }));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_field_out_of_range_panics() {
        let store = store(2);
        let loc = store.push(&["key-1", "aaaa"]).unwrap();
        let _ = store.read_field(loc, 2);
    }

    #[test]
    fn test_compact_closes_gaps() {
        let store = store(2);
        let a = store.push(&["aaaaaaaa", "1"]).unwrap();
        let b = store.push(&["bbbbbbbb", "2"]).unwrap();
        let c = store.push(&["cccccccc", "3"]).unwrap();
        let d = store.push(&["dddddddd", "4"]).unwrap();
        store.delete(a).unwrap();
        store.delete(c).unwrap();

        let before = store.size().unwrap();
        let map = store.compact().unwrap();
        assert_eq!(store.size().unwrap(), before - 2 * 25);
        assert_eq!(map.reclaimed(), 50);
        assert!(store.free_blocks().unwrap().is_empty());

        assert_eq!(map.relocate(a), None);
        assert_eq!(map.relocate(c), None);
        let b2 = map.relocate(b).unwrap();
        let d2 = map.relocate(d).unwrap();
        assert_eq!(b2, Location::new(8));
        assert_eq!(store.read_field(b2, 0).unwrap(), Some(b"bbbbbbbb".to_vec()));
        assert_eq!(store.read_field(d2, 1).unwrap(), Some(b"4".to_vec()));
    }

    #[test]
    fn test_compact_without_free_space_is_identity() {
        let store = store(1);
        let loc = store.push(&["sixteen bytes!!!"]).unwrap();
        let map = store.compact().unwrap();
        assert!(map.is_identity());
        assert_eq!(map.relocate(loc), Some(loc));
    }

    #[test]
    fn test_reopen_preserves_free_list() {
        let store = store(1);
        let a = store.push(&[vec![7u8; 40]]).unwrap();
        let _b = store.push(&[vec![8u8; 40]]).unwrap();
        store.delete(a).unwrap();

        let state = store.file.into_inner();
        let reopened = RecordStore::open(state.file, 1).unwrap();
        assert_eq!(reopened.free_blocks().unwrap().len(), 1);
        assert_eq!(reopened.push(&[vec![9u8; 40]]).unwrap(), a);
    }
}
