//! Error types for Burrow
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Not-found conditions (absent key, absent field, freed alias) are not errors:
//! they surface as `Ok(None)` or `Ok(false)` from the operation that hit them.

use crate::types::Location;
use std::io;
use thiserror::Error;

/// Result type alias for Burrow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Burrow storage core
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoded record is smaller than a free block header
    #[error("Record too small: {size} bytes (minimum {min})")]
    RecordTooSmall {
        /// Encoded size of the rejected record
        size: u64,
        /// Minimum encoded size
        min: u64,
    },

    /// Record does not carry the store's field count
    #[error("Field count mismatch: expected {expected}, got {actual}")]
    FieldCountMismatch {
        /// Fields per record in this store
        expected: usize,
        /// Fields supplied by the caller
        actual: usize,
    },

    /// In-place field overwrite with a value of a different length
    #[error("Field {field} length mismatch: stored {stored} bytes, new value {actual} bytes")]
    FieldLengthMismatch {
        /// Field index
        field: usize,
        /// Length currently stored
        stored: u64,
        /// Length of the replacement
        actual: u64,
    },

    /// The field an index is keyed on could not be read from the record
    #[error("Key field {field} missing for record at {location}")]
    MissingKeyField {
        /// Record location
        location: Location,
        /// Key field index
        field: usize,
    },

    /// An ordered index field does not hold an 8-byte big-endian order key
    #[error("Invalid order key: expected 8 bytes, got {0}")]
    InvalidOrderKey(usize),

    /// No index is configured on the requested field
    #[error("No index on field {0}")]
    UnknownIndex(usize),

    /// Ordered access on a table configured without an order field
    #[error("Table has no order field")]
    NoOrderField,

    /// On-disk structure is inconsistent
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Malformed configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
