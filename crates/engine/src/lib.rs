//! Table engine for Burrow
//!
//! This crate ties the storage structures together:
//! - Table: one record store, an alias list, a hash index per key field and
//!   an optional ordered index, kept consistent on every mutation
//! - TableConfig: the table layout, persisted as `burrow.toml`
//!
//! The engine is the only component that knows which structures belong
//! together. Storage structures never reach into each other beyond resolving
//! a pointer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod table;

pub use config::{TableConfig, CONFIG_FILE_NAME};
pub use table::{encode_order, Row, Table};
