//! Burrow - embedded file-backed record store
//!
//! Burrow stores fixed-arity records of opaque byte fields in a single file
//! and indexes them with two on-disk structures: a hash index that grows one
//! bucket split at a time, and a paginated ordered index for range reads.
//!
//! # Quick Start
//!
//! ```ignore
//! use burrowdb::{encode_order, Table, TableConfig};
//!
//! let config = TableConfig::new(3).with_key_field(0).with_order_field(2);
//! let table = Table::create("/tmp/people", config)?;
//!
//! let alice = table.insert(&[&b"alice"[..], b"engineer", &encode_order(30)])?;
//! let (_, record) = table.find(0, b"alice")?.unwrap();
//! let rows = table.range(18, 65)?;
//! ```
//!
//! # Architecture
//!
//! - [`Table`] keeps a record store and its indexes consistent
//! - The storage structures ([`RecordStore`], [`HashIndex`], [`AliasList`],
//!   [`OrderedList`]) can also be used directly, each over its own
//!   [`StorageFile`]

pub use burrow_core::{
    AliasRef, Error, Location, Pointer, Record, Result, SlotRef, MIN_RECORD_SIZE,
};
pub use burrow_engine::{encode_order, Row, Table, TableConfig, CONFIG_FILE_NAME};
pub use burrow_storage::{
    AliasList, Direct, DiskFile, HashIndex, HashIndexStats, KeyHasher, MemoryFile,
    OrderedEntry, OrderedList, PageCursor, RecordStore, RelocationMap, Resolver, StorageFile,
};
