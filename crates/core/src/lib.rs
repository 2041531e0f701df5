//! Core types for Burrow
//!
//! This crate defines the foundational types shared by every storage component:
//! - Location: Byte offset of a record in the record store file
//! - AliasRef: Byte offset of a stable slot in the alias list file
//! - SlotRef: Byte offset of a cell in a hash index file
//! - Pointer: What an index may store (a Location or an AliasRef)
//! - Record: A decoded multi-field record
//! - Limits: On-disk format constants
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod limits;
pub mod types;

pub use error::{Error, Result};
pub use limits::{
    ALIAS_HEADER_SIZE, FREE_BLOCK_HEADER_SIZE, HASH_HEADER_SIZE, MIN_RECORD_SIZE,
    ORDERED_HEADER_SIZE, PAGE_HEADER_SIZE, PAGE_ENTRY_SIZE, SKIP_ENTRY_SIZE, SLOT_SIZE,
    STORE_HEADER_SIZE,
};
pub use types::{AliasRef, Location, Pointer, Record, SlotRef};
