//! Storage layer for Burrow
//!
//! This crate implements the file-backed structures:
//! - RecordStore: variable-length multi-field records with free-list reuse
//!   and compaction
//! - HashIndex: open-addressed hash index that grows by linear hashing
//! - AliasList: stable identifiers for records that may move
//! - OrderedList: paginated sorted index over a numeric order key
//!
//! Each structure owns one [`StorageFile`] and guards it, together with its
//! cached header, behind its own lock. Indexes are generic over the
//! [`Pointer`](burrow_core::Pointer) they store and resolve it to a record
//! Location through a [`Resolver`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alias;
pub mod file;
pub mod hash;
mod header;
pub mod ordered;
pub mod record;
pub mod resolver;

pub use alias::AliasList;
pub use file::{DiskFile, MemoryFile, StorageFile};
pub use hash::{HashIndex, HashIndexStats, KeyHasher, MAX_SPLITS_PER_INSERT};
pub use ordered::{OrderedEntry, OrderedList, PageCursor};
pub use record::{FreeBlock, Move, RecordStore, RelocationMap};
pub use resolver::{Direct, Resolver};
