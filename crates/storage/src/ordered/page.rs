//! Ordered page encoding
//!
//! ```text
//! +---------------------+
//! | next: u64 LE        |  offset of the following page, 0 at the tail
//! | page_min: u64 LE    |  smallest live order in the page
//! | length: u64 LE      |  live entries
//! +---------------------+
//! | order: u64 LE       |  page_size slots; data_pos 0 marks an unused slot
//! | data_pos: u64 LE    |
//! | ...                 |
//! +---------------------+
//! ```

use burrow_core::{Error, Result, PAGE_ENTRY_SIZE, PAGE_HEADER_SIZE};
use byteorder::{ByteOrder, LittleEndian};

use crate::file::StorageFile;

/// Bytes one page occupies for a given capacity
pub(crate) fn page_bytes(page_size: usize) -> u64 {
    PAGE_HEADER_SIZE + page_size as u64 * PAGE_ENTRY_SIZE
}

/// One live `(order, data_pos)` slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub order: u64,
    pub data_pos: u64,
}

/// A page decoded into memory, live slots only
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Page {
    pub offset: u64,
    pub next: u64,
    pub min: u64,
    /// Live slots in on-disk order, which is sorted by `order`
    pub entries: Vec<Slot>,
    /// Slot index of each live entry, for in-place removal
    pub positions: Vec<usize>,
}

impl Page {
    pub fn empty(offset: u64, next: u64, min: u64) -> Self {
        Self {
            offset,
            next,
            min,
            entries: Vec::new(),
            positions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_full(&self, page_size: usize) -> bool {
        self.entries.len() >= page_size
    }

    /// Order of the largest live entry
    pub fn last_order(&self) -> Option<u64> {
        self.entries.last().map(|slot| slot.order)
    }

    /// Insert keeping entries sorted; equal orders go after existing ones
    pub fn insert_sorted(&mut self, slot: Slot) {
        let at = self.entries.partition_point(|e| e.order <= slot.order);
        self.entries.insert(at, slot);
        if self.entries.len() == 1 || slot.order < self.min {
            self.min = slot.order;
        }
    }

    /// Recompute `min` from the live entries, leaving it alone when empty
    pub fn refresh_min(&mut self) {
        if let Some(first) = self.entries.first() {
            self.min = first.order;
        }
    }

    pub fn read(file: &mut dyn StorageFile, offset: u64, page_size: usize) -> Result<Self> {
        let mut buf = vec![0u8; page_bytes(page_size) as usize];
        file.read_at(offset, &mut buf)?;

        let next = LittleEndian::read_u64(&buf[0..8]);
        let min = LittleEndian::read_u64(&buf[8..16]);
        let length = LittleEndian::read_u64(&buf[16..24]);

        let mut page = Page::empty(offset, next, min);
        let slots = buf[PAGE_HEADER_SIZE as usize..].chunks_exact(PAGE_ENTRY_SIZE as usize);
        for (i, raw) in slots.enumerate() {
            let data_pos = LittleEndian::read_u64(&raw[8..16]);
            if data_pos != 0 {
                page.entries.push(Slot {
                    order: LittleEndian::read_u64(&raw[0..8]),
                    data_pos,
                });
                page.positions.push(i);
            }
        }

        if page.entries.len() as u64 != length {
            return Err(Error::Corruption(format!(
                "page @{} records {} entries but holds {}",
                offset,
                length,
                page.entries.len()
            )));
        }
        Ok(page)
    }

    /// Write the whole page, live entries packed at the front
    pub fn write(&mut self, file: &mut dyn StorageFile, page_size: usize) -> Result<()> {
        debug_assert!(self.entries.len() <= page_size);
        let mut buf = vec![0u8; page_bytes(page_size) as usize];
        LittleEndian::write_u64(&mut buf[0..8], self.next);
        LittleEndian::write_u64(&mut buf[8..16], self.min);
        LittleEndian::write_u64(&mut buf[16..24], self.entries.len() as u64);
        for (i, slot) in self.entries.iter().enumerate() {
            let at = (PAGE_HEADER_SIZE + i as u64 * PAGE_ENTRY_SIZE) as usize;
            LittleEndian::write_u64(&mut buf[at..at + 8], slot.order);
            LittleEndian::write_u64(&mut buf[at + 8..at + 16], slot.data_pos);
        }
        file.write_at(self.offset, &buf)?;
        self.positions = (0..self.entries.len()).collect();
        Ok(())
    }

    /// Zero the slot of entry `index` and rewrite the page header only
    pub fn clear_entry(&mut self, file: &mut dyn StorageFile, index: usize) -> Result<()> {
        let slot_index = self.positions.remove(index);
        self.entries.remove(index);
        self.refresh_min();

        let at = self.offset + PAGE_HEADER_SIZE + slot_index as u64 * PAGE_ENTRY_SIZE;
        file.write_at(at, &[0u8; PAGE_ENTRY_SIZE as usize])?;
        self.write_header(file)
    }

    /// Rewrite just `next`, `page_min` and `length`
    pub fn write_header(&self, file: &mut dyn StorageFile) -> Result<()> {
        let mut buf = [0u8; PAGE_HEADER_SIZE as usize];
        LittleEndian::write_u64(&mut buf[0..8], self.next);
        LittleEndian::write_u64(&mut buf[8..16], self.min);
        LittleEndian::write_u64(&mut buf[16..24], self.entries.len() as u64);
        file.write_at(self.offset, &buf)?;
        Ok(())
    }
}
