//! Core types for Burrow
//!
//! This module defines the identifiers that tie the storage files together:
//! - Location: where a record lives in the record store file
//! - AliasRef: a stable slot in the alias list file
//! - SlotRef: a cell in a hash index file
//!
//! All three are byte offsets, but they are never interchangeable. An index
//! stores either raw Locations or AliasRefs; the `Pointer` trait is the seam
//! between the two.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte offset of a record in the record store file
///
/// Locations are only valid until the next `RecordStore::compact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location(u64);

impl Location {
    /// Wrap a raw file offset
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// The raw file offset
    pub const fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Byte offset of a slot in the alias list file
///
/// An AliasRef never changes for the lifetime of the alias file, which makes it
/// a location-independent identifier for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AliasRef(u64);

impl AliasRef {
    /// Wrap a raw slot offset
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// The raw slot offset
    pub const fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AliasRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alias:{}", self.0)
    }
}

/// Byte offset of a cell in a hash index file
///
/// Valid only until the next mutation of that index: a resize step may move
/// entries between cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef(u64);

impl SlotRef {
    /// Wrap a raw cell offset
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// The raw cell offset
    pub const fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// A value an index can store in an 8-byte cell
///
/// Zero is reserved by every structure as the empty marker, so `raw()` of a
/// live pointer is never zero (every file has a non-empty header).
pub trait Pointer: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Rebuild a pointer from a stored cell
    fn from_raw(raw: u64) -> Self;

    /// The cell value to store
    fn raw(self) -> u64;
}

impl Pointer for Location {
    fn from_raw(raw: u64) -> Self {
        Location(raw)
    }

    fn raw(self) -> u64 {
        self.0
    }
}

impl Pointer for AliasRef {
    fn from_raw(raw: u64) -> Self {
        AliasRef(raw)
    }

    fn raw(self) -> u64 {
        self.0
    }
}

/// A decoded record: an ordered list of opaque byte-string fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    fields: Vec<Vec<u8>>,
}

impl Record {
    /// Create a record from its fields
    pub fn new(fields: Vec<Vec<u8>>) -> Self {
        Self { fields }
    }

    /// Field `index`, if present
    pub fn field(&self, index: usize) -> Option<&[u8]> {
        self.fields.get(index).map(Vec::as_slice)
    }

    /// All fields in order
    pub fn fields(&self) -> &[Vec<u8>] {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consume the record, returning its fields
    pub fn into_fields(self) -> Vec<Vec<u8>> {
        self.fields
    }
}

impl From<Vec<Vec<u8>>> for Record {
    fn from(fields: Vec<Vec<u8>>) -> Self {
        Self::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_location_display() {
        assert_eq!(Location::new(8).to_string(), "@8");
    }

    #[test]
    fn test_alias_display() {
        assert_eq!(AliasRef::new(16).to_string(), "alias:16");
    }

    #[test]
    fn test_record_accessors() {
        let record = Record::new(vec![b"alice".to_vec(), b"30".to_vec()]);
        assert_eq!(record.len(), 2);
        assert_eq!(record.field(0), Some(&b"alice"[..]));
        assert_eq!(record.field(2), None);
        assert!(!record.is_empty());
    }

    proptest! {
        #[test]
        fn pointer_raw_is_identity(raw in 1u64..u64::MAX) {
            prop_assert_eq!(Location::from_raw(raw).raw(), raw);
            prop_assert_eq!(AliasRef::from_raw(raw).raw(), raw);
        }
    }
}
