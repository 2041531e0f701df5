//! Record encoding
//!
//! ```text
//! +---------------------------+
//! | skip[0]   u64 LE          |  skip[i] = len(field 0) + ... + len(field i)
//! | ...                       |
//! | skip[N-1] u64 LE          |
//! +---------------------------+
//! | field 0 bytes             |
//! | ...                       |
//! | field N-1 bytes           |
//! +---------------------------+
//! ```

use burrow_core::SKIP_ENTRY_SIZE;
use byteorder::{ByteOrder, LittleEndian};

/// Encoded size of a record with these fields
pub(crate) fn encoded_size<F: AsRef<[u8]>>(fields: &[F]) -> u64 {
    let data: u64 = fields.iter().map(|f| f.as_ref().len() as u64).sum();
    skip_table_size(fields.len()) + data
}

/// Size of the skip table for `field_count` fields
pub(crate) fn skip_table_size(field_count: usize) -> u64 {
    field_count as u64 * SKIP_ENTRY_SIZE
}

/// Encode a record into its on-disk bytes
pub(crate) fn encode<F: AsRef<[u8]>>(fields: &[F]) -> Vec<u8> {
    let mut buf = vec![0u8; encoded_size(fields) as usize];
    let table = skip_table_size(fields.len()) as usize;

    let mut skip = 0u64;
    let mut cursor = table;
    for (i, field) in fields.iter().enumerate() {
        let bytes = field.as_ref();
        skip += bytes.len() as u64;
        LittleEndian::write_u64(&mut buf[i * 8..i * 8 + 8], skip);
        buf[cursor..cursor + bytes.len()].copy_from_slice(bytes);
        cursor += bytes.len();
    }
    buf
}

/// A decoded skip table
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SkipTable {
    skips: Vec<u64>,
}

impl SkipTable {
    /// Decode a skip table, rejecting one that decreases
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let skips: Vec<u64> = buf.chunks_exact(8).map(LittleEndian::read_u64).collect();
        if skips.windows(2).any(|w| w[1] < w[0]) {
            return None;
        }
        Some(Self { skips })
    }

    /// Byte range of field `index`, relative to the end of the skip table
    pub fn field_range(&self, index: usize) -> (u64, u64) {
        let start = if index == 0 { 0 } else { self.skips[index - 1] };
        (start, self.skips[index])
    }

    /// Total bytes of field data
    pub fn data_len(&self) -> u64 {
        self.skips.last().copied().unwrap_or(0)
    }

    /// Full encoded size: skip table plus field data
    pub fn record_len(&self) -> u64 {
        skip_table_size(self.skips.len()) + self.data_len()
    }
}

/// Byte range of field `index` from the two skip entries that bound it
///
/// `prev` is `skip[index - 1]` (0 for the first field).
pub(crate) fn bounded_range(prev: u64, skip: u64) -> Option<(u64, u64)> {
    (skip >= prev).then_some((prev, skip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let fields: [&[u8]; 3] = [b"alice", b"30", b"engineer"];
        let buf = encode(&fields);
        assert_eq!(buf.len(), 24 + 15);
        assert_eq!(LittleEndian::read_u64(&buf[0..8]), 5);
        assert_eq!(LittleEndian::read_u64(&buf[8..16]), 7);
        assert_eq!(LittleEndian::read_u64(&buf[16..24]), 15);
        assert_eq!(&buf[24..29], b"alice");
        assert_eq!(&buf[29..31], b"30");
        assert_eq!(&buf[31..], b"engineer");
    }

    #[test]
    fn test_skip_table_ranges() {
        let fields: [&[u8]; 3] = [b"ab", b"", b"cde"];
        let buf = encode(&fields);
        let table = SkipTable::decode(&buf[..24]).unwrap();
        assert_eq!(table.field_range(0), (0, 2));
        assert_eq!(table.field_range(1), (2, 2));
        assert_eq!(table.field_range(2), (2, 5));
        assert_eq!(table.record_len(), 29);
    }

    #[test]
    fn test_decreasing_skip_table_rejected() {
        let mut buf = [0u8; 16];
        LittleEndian::write_u64(&mut buf[0..8], 10);
        LittleEndian::write_u64(&mut buf[8..16], 4);
        assert!(SkipTable::decode(&buf).is_none());
    }

    #[test]
    fn test_bounded_range() {
        assert_eq!(bounded_range(3, 9), Some((3, 9)));
        assert_eq!(bounded_range(9, 3), None);
    }
}
