//! On-disk format constants
//!
//! All integers are stored little-endian. Every file starts with a fixed-size
//! header; the sizes here are part of the format and must not change without a
//! migration.

/// Size of one cumulative skip entry in a record's skip table.
pub const SKIP_ENTRY_SIZE: u64 = 8;

/// Free block header: `size:u64, next:u64`.
pub const FREE_BLOCK_HEADER_SIZE: u64 = 16;

/// Smallest encodable record. A deleted record must be able to hold a free
/// block header in place.
pub const MIN_RECORD_SIZE: u64 = FREE_BLOCK_HEADER_SIZE;

/// Record store header: `free:u64`.
pub const STORE_HEADER_SIZE: u64 = 8;

/// Hash index header: `seed:[u32; 4], slots, resize_slots, resize_lookup_slots,
/// reserved, length`.
pub const HASH_HEADER_SIZE: u64 = 56;

/// Size of one hash or alias slot.
pub const SLOT_SIZE: u64 = 8;

/// Alias list header: `length:u64`.
pub const ALIAS_HEADER_SIZE: u64 = 8;

/// Ordered list header: `pages, min, max, first_page_offset`.
pub const ORDERED_HEADER_SIZE: u64 = 32;

/// Ordered page header: `next, page_min, length`.
pub const PAGE_HEADER_SIZE: u64 = 24;

/// Ordered page entry: `order:u64, data_pos:u64`.
pub const PAGE_ENTRY_SIZE: u64 = 16;
