//! Table: a record store with its indexes
//!
//! A table directory holds one file per component:
//!
//! ```text
//! <dir>/burrow.toml       layout (see `TableConfig`)
//! <dir>/records.dat       RecordStore
//! <dir>/aliases.dat       AliasList
//! <dir>/index-<field>.dat HashIndex per key field
//! <dir>/ordered.dat       OrderedList, if an order field is configured
//! ```
//!
//! Every index stores AliasRefs, never raw Locations, so records can move
//! (on update or compaction) by rewriting one alias slot.
//!
//! # Locking
//!
//! A table-level reader/writer lock covers every operation. Mutations and
//! compaction hold it exclusively, so a reader never follows an alias while
//! its record is being moved. Beneath it each component lock is taken one at
//! a time, apart from the index-then-store order a hash probe uses.

use burrow_core::{AliasRef, Error, Record, Result, MIN_RECORD_SIZE, SKIP_ENTRY_SIZE};
use burrow_storage::{
    AliasList, DiskFile, HashIndex, OrderedEntry, OrderedList, RecordStore, StorageFile,
};
use byteorder::{BigEndian, ByteOrder};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{TableConfig, CONFIG_FILE_NAME};

const RECORDS_FILE: &str = "records.dat";
const ALIASES_FILE: &str = "aliases.dat";
const ORDERED_FILE: &str = "ordered.dat";

fn index_file_name(field: usize) -> String {
    format!("index-{}.dat", field)
}

/// Encode an order key the way the order field stores it
pub fn encode_order(order: u64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, order);
    buf
}

fn decode_order(bytes: &[u8]) -> Result<u64> {
    if bytes.len() != 8 {
        return Err(Error::InvalidOrderKey(bytes.len()));
    }
    Ok(BigEndian::read_u64(bytes))
}

/// A record returned from an ordered read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Stable identity of the record
    pub alias: AliasRef,
    /// Value of the order field
    pub order: u64,
    /// The record itself
    pub record: Record,
}

struct KeyIndex {
    field: usize,
    index: HashIndex<AliasRef>,
}

/// Record store plus its configured hash and ordered indexes
pub struct Table {
    dir: PathBuf,
    config: TableConfig,
    store: Arc<RecordStore>,
    aliases: Arc<AliasList>,
    indexes: Vec<KeyIndex>,
    ordered: Option<OrderedList<AliasRef>>,
    lock: RwLock<()>,
}

impl Table {
    /// Create an empty table in `dir`, replacing any table already there
    pub fn create(dir: impl AsRef<Path>, config: TableConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        config.write_to_file(&dir.join(CONFIG_FILE_NAME))?;

        let store = Arc::new(RecordStore::create(
            create_file(&dir, RECORDS_FILE)?,
            config.field_count,
        )?);
        let aliases = Arc::new(AliasList::create(create_file(&dir, ALIASES_FILE)?)?);
        let indexes = config
            .key_fields
            .iter()
            .map(|&field| {
                let index = HashIndex::create(
                    create_file(&dir, &index_file_name(field))?,
                    store.clone(),
                    aliases.clone(),
                    field,
                    config.initial_slots,
                )?;
                Ok(KeyIndex { field, index })
            })
            .collect::<Result<Vec<_>>>()?;
        let ordered = match config.order_field {
            Some(_) => Some(OrderedList::create(
                create_file(&dir, ORDERED_FILE)?,
                config.page_size,
            )?),
            None => None,
        };

        info!(
            path = %dir.display(),
            fields = config.field_count,
            indexes = indexes.len(),
            ordered = ordered.is_some(),
            "Created table"
        );
        Ok(Self {
            dir,
            config,
            store,
            aliases,
            indexes,
            ordered,
            lock: RwLock::new(()),
        })
    }

    /// Open the table in `dir` using its `burrow.toml`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let config = TableConfig::from_file(&dir.join(CONFIG_FILE_NAME))?;

        let store = Arc::new(RecordStore::open(
            open_file(&dir, RECORDS_FILE)?,
            config.field_count,
        )?);
        let aliases = Arc::new(AliasList::open(open_file(&dir, ALIASES_FILE)?)?);
        let indexes = config
            .key_fields
            .iter()
            .map(|&field| {
                let index = HashIndex::open(
                    open_file(&dir, &index_file_name(field))?,
                    store.clone(),
                    aliases.clone(),
                    field,
                )?;
                Ok(KeyIndex { field, index })
            })
            .collect::<Result<Vec<_>>>()?;
        let ordered = match config.order_field {
            Some(_) => Some(OrderedList::open(
                open_file(&dir, ORDERED_FILE)?,
                config.page_size,
            )?),
            None => None,
        };

        info!(path = %dir.display(), fields = config.field_count, "Opened table");
        Ok(Self {
            dir,
            config,
            store,
            aliases,
            indexes,
            ordered,
            lock: RwLock::new(()),
        })
    }

    /// Open the table in `dir`, creating it on first use
    ///
    /// A missing `burrow.toml` is written with defaults first, so a new
    /// table can be shaped by editing that file before the first open.
    pub fn open_or_create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.join(RECORDS_FILE).exists() {
            return Self::open(dir);
        }
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        TableConfig::write_default_if_missing(&config_path)?;
        let config = TableConfig::from_file(&config_path)?;
        Self::create(dir, config)
    }

    /// Directory holding the table's files
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// The table's layout
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Store a record and register it with every index
    pub fn insert<F: AsRef<[u8]>>(&self, fields: &[F]) -> Result<AliasRef> {
        if fields.len() != self.config.field_count {
            return Err(Error::FieldCountMismatch {
                expected: self.config.field_count,
                actual: fields.len(),
            });
        }
        let order = match self.config.order_field {
            Some(field) => Some(decode_order(fields[field].as_ref())?),
            None => None,
        };

        let _writer = self.lock.write();
        let loc = self.store.push(fields)?;
        let alias = self.aliases.add(loc)?;
        for key in &self.indexes {
            key.index.insert(alias)?;
        }
        if let (Some(ordered), Some(order)) = (&self.ordered, order) {
            ordered.insert(order, alias)?;
        }
        debug!(%alias, location = %loc, "Inserted row");
        Ok(alias)
    }

    /// The record behind `alias`
    pub fn get(&self, alias: AliasRef) -> Result<Option<Record>> {
        let _reader = self.lock.read();
        self.get_unlocked(alias)
    }

    fn get_unlocked(&self, alias: AliasRef) -> Result<Option<Record>> {
        match self.aliases.deref(alias)? {
            Some(loc) => self.store.read(loc),
            None => Ok(None),
        }
    }

    /// The record whose key `field` equals `key`
    ///
    /// # Errors
    ///
    /// `Error::UnknownIndex` if `field` has no hash index.
    pub fn find(&self, field: usize, key: &[u8]) -> Result<Option<(AliasRef, Record)>> {
        let index = self.index_on(field)?;
        let _reader = self.lock.read();
        let Some((_, alias)) = index.find_pointer(key)? else {
            return Ok(None);
        };
        Ok(self.get_unlocked(alias)?.map(|record| (alias, record)))
    }

    /// Replace some fields of the record behind `alias`
    ///
    /// The record is rewritten in place when every replacement keeps its
    /// field's length, and moved otherwise; `alias` stays valid either way.
    /// Returns `Ok(false)` if `alias` designates no record.
    ///
    /// # Panics
    ///
    /// Panics if an update names a field the table does not have.
    pub fn update<F: AsRef<[u8]>>(&self, alias: AliasRef, updates: &[(usize, F)]) -> Result<bool> {
        for (field, _) in updates {
            assert!(
                *field < self.config.field_count,
                "field {} out of range for {}-field table",
                field,
                self.config.field_count
            );
        }
        let new_order = match self.config.order_field {
            Some(order_field) => updates
                .iter()
                .rev()
                .find(|(field, _)| *field == order_field)
                .map(|(_, value)| decode_order(value.as_ref()))
                .transpose()?,
            None => None,
        };

        let _writer = self.lock.write();
        let Some(loc) = self.aliases.deref(alias)? else {
            return Ok(false);
        };
        let Some(old) = self.store.read(loc)? else {
            return Ok(false);
        };
        // Index entries are dropped before the push, so reject what the push
        // would refuse while nothing has changed yet
        let size = updated_size(&old, updates);
        if size < MIN_RECORD_SIZE {
            return Err(Error::RecordTooSmall {
                size,
                min: MIN_RECORD_SIZE,
            });
        }

        // Drop index entries whose key is about to change
        let mut rekeyed = Vec::new();
        for (i, key) in self.indexes.iter().enumerate() {
            let old_key = &old.fields()[key.field];
            let changed = updates
                .iter()
                .any(|(field, value)| *field == key.field && value.as_ref() != old_key.as_slice());
            if changed {
                self.unindex(key, alias, old_key)?;
                rekeyed.push(i);
            }
        }

        let Some(new_loc) = self.store.push_updated(loc, updates)? else {
            return Ok(false);
        };
        if new_loc != loc {
            self.aliases.update(alias, new_loc)?;
            self.store.delete(loc)?;
            debug!(%alias, from = %loc, to = %new_loc, "Moved row");
        }

        for i in rekeyed {
            self.indexes[i].index.insert(alias)?;
        }
        if let (Some(ordered), Some(order_field), Some(new_order)) =
            (&self.ordered, self.config.order_field, new_order)
        {
            let old_order = decode_order(&old.fields()[order_field])?;
            if old_order != new_order {
                ordered.remove(old_order, alias)?;
                ordered.insert(new_order, alias)?;
            }
        }
        Ok(true)
    }

    /// Remove the record behind `alias` from every index and free it
    ///
    /// Returns `Ok(false)` if `alias` designates no record.
    pub fn delete(&self, alias: AliasRef) -> Result<bool> {
        let _writer = self.lock.write();
        let Some(loc) = self.aliases.deref(alias)? else {
            return Ok(false);
        };
        let Some(record) = self.store.read(loc)? else {
            return Ok(false);
        };

        for key in &self.indexes {
            self.unindex(key, alias, &record.fields()[key.field])?;
        }
        if let (Some(ordered), Some(field)) = (&self.ordered, self.config.order_field) {
            ordered.remove(decode_order(&record.fields()[field])?, alias)?;
        }
        self.aliases.remove(alias)?;
        self.store.delete(loc)?;
        debug!(%alias, location = %loc, "Deleted row");
        Ok(true)
    }

    /// Rows of `page_count` ordered pages starting at page `start_page`
    ///
    /// # Errors
    ///
    /// `Error::NoOrderField` if the table has no ordered index.
    pub fn scan(&self, start_page: u64, page_count: u64) -> Result<Vec<Row>> {
        let ordered = self.ordered.as_ref().ok_or(Error::NoOrderField)?;
        let _reader = self.lock.read();
        self.resolve_rows(ordered.page_iterate(start_page, page_count))
    }

    /// Rows with `lo <= order <= hi`, in order
    ///
    /// # Errors
    ///
    /// `Error::NoOrderField` if the table has no ordered index.
    pub fn range(&self, lo: u64, hi: u64) -> Result<Vec<Row>> {
        let ordered = self.ordered.as_ref().ok_or(Error::NoOrderField)?;
        let _reader = self.lock.read();
        self.resolve_rows(ordered.range(lo, hi))
    }

    /// Number of live records
    pub fn len(&self) -> Result<usize> {
        let _reader = self.lock.read();
        Ok(self.aliases.iter_live()?.len())
    }

    /// True if the table holds no records
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Compact the record store and repoint every alias
    ///
    /// Returns the number of bytes reclaimed.
    pub fn compact(&self) -> Result<u64> {
        let _writer = self.lock.write();
        let map = self.store.compact()?;
        let mut moved = 0usize;
        let live = if map.is_identity() {
            Vec::new()
        } else {
            self.aliases.iter_live()?
        };
        for (alias, loc) in live {
            match map.relocate(loc) {
                Some(new_loc) if new_loc != loc => {
                    self.aliases.update(alias, new_loc)?;
                    moved += 1;
                }
                Some(_) => {}
                None => warn!(%alias, location = %loc, "Alias points into reclaimed space"),
            }
        }
        info!(
            path = %self.dir.display(),
            reclaimed = map.reclaimed(),
            moved,
            "Compacted table"
        );
        Ok(map.reclaimed())
    }

    /// Persist every component header and sync every file
    pub fn flush(&self) -> Result<()> {
        let _writer = self.lock.write();
        self.store.flush_header()?;
        self.aliases.flush_header()?;
        for key in &self.indexes {
            key.index.flush_header()?;
        }
        if let Some(ordered) = &self.ordered {
            ordered.flush_header()?;
        }
        Ok(())
    }

    /// Flush and release every file
    pub fn close(self) -> Result<()> {
        for key in self.indexes {
            key.index.close()?;
        }
        if let Some(ordered) = self.ordered {
            ordered.close()?;
        }
        // The indexes held the other references
        match Arc::try_unwrap(self.aliases) {
            Ok(aliases) => aliases.close()?,
            Err(aliases) => aliases.flush_header()?,
        }
        match Arc::try_unwrap(self.store) {
            Ok(store) => store.close()?,
            Err(store) => store.flush_header()?,
        }
        info!(path = %self.dir.display(), "Closed table");
        Ok(())
    }

    fn index_on(&self, field: usize) -> Result<&HashIndex<AliasRef>> {
        self.indexes
            .iter()
            .find(|key| key.field == field)
            .map(|key| &key.index)
            .ok_or(Error::UnknownIndex(field))
    }

    /// Remove `key` from an index if the entry belongs to `alias`
    fn unindex(&self, key: &KeyIndex, alias: AliasRef, value: &[u8]) -> Result<()> {
        if let Some((_, owner)) = key.index.find_pointer(value)? {
            if owner == alias {
                key.index.remove(value)?;
            }
        }
        Ok(())
    }

    fn resolve_rows<I>(&self, entries: I) -> Result<Vec<Row>>
    where
        I: Iterator<Item = Result<OrderedEntry<AliasRef>>>,
    {
        let mut rows = Vec::new();
        for entry in entries {
            let entry = entry?;
            match self.get_unlocked(entry.pointer)? {
                Some(record) => rows.push(Row {
                    alias: entry.pointer,
                    order: entry.order,
                    record,
                }),
                None => warn!(alias = %entry.pointer, "Ordered entry designates no record"),
            }
        }
        Ok(rows)
    }
}

/// Encoded size of `record` once `updates` are applied
fn updated_size<F: AsRef<[u8]>>(record: &Record, updates: &[(usize, F)]) -> u64 {
    let data: usize = record
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            updates
                .iter()
                .rev()
                .find(|(updated, _)| *updated == i)
                .map_or(field.len(), |(_, value)| value.as_ref().len())
        })
        .sum();
    record.len() as u64 * SKIP_ENTRY_SIZE + data as u64
}

fn create_file(dir: &Path, name: &str) -> Result<Box<dyn StorageFile>> {
    Ok(Box::new(DiskFile::create(dir.join(name))?))
}

fn open_file(dir: &Path, name: &str) -> Result<Box<dyn StorageFile>> {
    Ok(Box::new(DiskFile::open(dir.join(name))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn people(dir: &Path) -> Table {
        let config = TableConfig::new(3).with_key_field(0).with_order_field(2);
        Table::create(dir, config).unwrap()
    }

    fn row(name: &str, role: &str, order: u64) -> Vec<Vec<u8>> {
        vec![
            name.as_bytes().to_vec(),
            role.as_bytes().to_vec(),
            encode_order(order).to_vec(),
        ]
    }

    #[test]
    fn test_insert_get_find() {
        let dir = TempDir::new().unwrap();
        let table = people(dir.path());
        let alias = table.insert(&row("alice", "engineer", 30)).unwrap();

        let record = table.get(alias).unwrap().unwrap();
        assert_eq!(record.field(1), Some(&b"engineer"[..]));
        let (found, _) = table.find(0, b"alice").unwrap().unwrap();
        assert_eq!(found, alias);
        assert!(table.find(0, b"bob").unwrap().is_none());
    }

    #[test]
    fn test_find_on_unindexed_field() {
        let dir = TempDir::new().unwrap();
        let table = people(dir.path());
        assert!(matches!(table.find(1, b"x"), Err(Error::UnknownIndex(1))));
    }

    #[test]
    fn test_bad_order_key_rejected_before_write() {
        let dir = TempDir::new().unwrap();
        let table = people(dir.path());
        let result = table.insert(&[b"alice".to_vec(), b"x".to_vec(), b"short".to_vec()]);
        assert!(matches!(result, Err(Error::InvalidOrderKey(5))));
        assert_eq!(table.len().unwrap(), 0);
    }

    #[test]
    fn test_update_too_small_keeps_key_indexed() {
        let dir = TempDir::new().unwrap();
        let table = Table::create(dir.path(), TableConfig::new(1).with_key_field(0)).unwrap();
        let alias = table.insert(&["alice-smith-long"]).unwrap();

        let result = table.update(alias, &[(0, "ab")]);
        assert!(matches!(
            result,
            Err(Error::RecordTooSmall { size: 10, min: 16 })
        ));
        assert_eq!(
            table.get(alias).unwrap().unwrap().field(0),
            Some(&b"alice-smith-long"[..])
        );
        assert_eq!(table.find(0, b"alice-smith-long").unwrap().unwrap().0, alias);
        assert!(table.find(0, b"ab").unwrap().is_none());
    }

    #[test]
    fn test_updated_size_uses_last_replacement() {
        let record = Record::new(vec![b"alice".to_vec(), b"x".to_vec()]);
        assert_eq!(updated_size(&record, &[(1, "yyy"), (1, "zz")]), 16 + 5 + 2);
        assert_eq!(updated_size::<&str>(&record, &[]), 16 + 6);
    }

    #[test]
    fn test_update_same_length_stays_in_place() {
        let dir = TempDir::new().unwrap();
        let table = people(dir.path());
        let alias = table.insert(&row("alice", "engineer", 30)).unwrap();
        let before = table.aliases.deref(alias).unwrap();

        assert!(table.update(alias, &[(1, b"designer")]).unwrap());
        assert_eq!(table.aliases.deref(alias).unwrap(), before);
        assert_eq!(
            table.get(alias).unwrap().unwrap().field(1),
            Some(&b"designer"[..])
        );
    }

    #[test]
    fn test_update_rekeys_and_moves() {
        let dir = TempDir::new().unwrap();
        let table = people(dir.path());
        let alias = table.insert(&row("alice", "engineer", 30)).unwrap();
        let before = table.aliases.deref(alias).unwrap();

        assert!(table.update(alias, &[(0, b"alice-smith".to_vec())]).unwrap());
        assert_ne!(table.aliases.deref(alias).unwrap(), before);
        assert!(table.find(0, b"alice").unwrap().is_none());
        assert_eq!(table.find(0, b"alice-smith").unwrap().unwrap().0, alias);
    }

    #[test]
    fn test_update_reorders() {
        let dir = TempDir::new().unwrap();
        let table = people(dir.path());
        let a = table.insert(&row("a", "x", 10)).unwrap();
        let b = table.insert(&row("b", "x", 20)).unwrap();
        table.update(a, &[(2, encode_order(30))]).unwrap();

        let order: Vec<AliasRef> = table.range(0, 100).unwrap().iter().map(|r| r.alias).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn test_delete_clears_every_index() {
        let dir = TempDir::new().unwrap();
        let table = people(dir.path());
        let alias = table.insert(&row("alice", "engineer", 30)).unwrap();
        assert!(table.delete(alias).unwrap());
        assert!(!table.delete(alias).unwrap());
        assert!(table.get(alias).unwrap().is_none());
        assert!(table.find(0, b"alice").unwrap().is_none());
        assert!(table.range(0, u64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_replaced_key_is_not_unindexed_by_old_owner() {
        let dir = TempDir::new().unwrap();
        let table = people(dir.path());
        let first = table.insert(&row("alice", "engineer", 1)).unwrap();
        let second = table.insert(&row("alice", "manager!", 2)).unwrap();
        assert_eq!(table.find(0, b"alice").unwrap().unwrap().0, second);

        table.delete(first).unwrap();
        assert_eq!(table.find(0, b"alice").unwrap().unwrap().0, second);
    }

    #[test]
    fn test_scan_without_order_field() {
        let dir = TempDir::new().unwrap();
        let table = Table::create(dir.path(), TableConfig::new(2).with_key_field(0)).unwrap();
        assert!(matches!(table.scan(0, 1), Err(Error::NoOrderField)));
        assert!(matches!(table.range(0, 1), Err(Error::NoOrderField)));
    }

    #[test]
    fn test_open_or_create_writes_default_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table");
        let table = Table::open_or_create(&path).unwrap();
        assert_eq!(table.config(), &TableConfig::default());
        let alias = table.insert(&["key-0", "value"]).unwrap();
        table.close().unwrap();

        let table = Table::open_or_create(&path).unwrap();
        assert_eq!(table.find(0, b"key-0").unwrap().unwrap().0, alias);
    }
}
