//! Ordered list
//!
//! Entries `(order, pointer)` kept sorted by a numeric order key, stored as a
//! singly linked chain of fixed-capacity pages. Duplicate orders are allowed;
//! an entry is identified by its order together with its pointer.
//!
//! # File Format
//!
//! ```text
//! +-----------------------------+
//! | pages: u64 LE               |  pages ever allocated
//! | min: u64 LE                 |  smallest live order
//! | max: u64 LE                 |  largest live order
//! | first_page_offset: u64 LE   |  head of the chain, 0 before the first insert
//! +-----------------------------+
//! | page ...                    |  see `page.rs`
//! +-----------------------------+
//! ```
//!
//! An empty list stores `min = u64::MAX, max = 0`.
//!
//! # Ordering
//!
//! Along the chain `page_min` never decreases, and every live order in a page
//! lies between its own `page_min` and the next page's. A page emptied by
//! removals keeps its last `page_min` and stays linked; the space is reused by
//! later inserts that land on it.

mod cursor;
mod page;

pub use cursor::PageCursor;

use burrow_core::{Error, Pointer, Result, ORDERED_HEADER_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use std::marker::PhantomData;
use tracing::{debug, info, trace};

use crate::file::StorageFile;
use crate::header::{FileState, Header, LockedFile};
use page::{page_bytes, Page, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OrderedHeader {
    pages: u64,
    min: u64,
    max: u64,
    first_page_offset: u64,
}

impl OrderedHeader {
    fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

impl Header for OrderedHeader {
    const SIZE: usize = ORDERED_HEADER_SIZE as usize;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.pages);
        LittleEndian::write_u64(&mut buf[8..16], self.min);
        LittleEndian::write_u64(&mut buf[16..24], self.max);
        LittleEndian::write_u64(&mut buf[24..32], self.first_page_offset);
    }

    fn decode(buf: &[u8]) -> Self {
        OrderedHeader {
            pages: LittleEndian::read_u64(&buf[0..8]),
            min: LittleEndian::read_u64(&buf[8..16]),
            max: LittleEndian::read_u64(&buf[16..24]),
            first_page_offset: LittleEndian::read_u64(&buf[24..32]),
        }
    }
}

/// One entry yielded by iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderedEntry<P> {
    /// Sort key
    pub order: u64,
    /// What the entry designates
    pub pointer: P,
}

/// Paginated sorted index over a numeric order key
pub struct OrderedList<P: Pointer> {
    page_size: usize,
    file: LockedFile<OrderedHeader>,
    _pointer: PhantomData<P>,
}

type State = FileState<OrderedHeader>;

impl<P: Pointer> OrderedList<P> {
    /// Initialize an empty list in `file`, discarding its contents
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    pub fn create(mut file: Box<dyn StorageFile>, page_size: usize) -> Result<Self> {
        assert!(page_size > 0, "ordered list page size must be non-zero");
        let header = OrderedHeader {
            pages: 0,
            min: u64::MAX,
            max: 0,
            first_page_offset: 0,
        };
        file.set_len(0)?;
        header.write_to(file.as_mut())?;
        info!(page_size, "Created ordered list");
        Ok(Self {
            page_size,
            file: LockedFile::new(file, header),
            _pointer: PhantomData,
        })
    }

    /// Open an existing list written with the same `page_size`
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    pub fn open(mut file: Box<dyn StorageFile>, page_size: usize) -> Result<Self> {
        assert!(page_size > 0, "ordered list page size must be non-zero");
        let len = file.len()?;
        if len < ORDERED_HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "ordered list is {} bytes, shorter than its header",
                len
            )));
        }
        let header = OrderedHeader::read_from(file.as_mut())?;
        let expected = ORDERED_HEADER_SIZE + header.pages * page_bytes(page_size);
        if len < expected {
            return Err(Error::Corruption(format!(
                "ordered list claims {} pages of {} entries but holds {} bytes",
                header.pages, page_size, len
            )));
        }
        if (header.pages == 0) != (header.first_page_offset == 0) {
            return Err(Error::Corruption(format!(
                "ordered list head @{} inconsistent with {} pages",
                header.first_page_offset, header.pages
            )));
        }
        info!(page_size, pages = header.pages, "Opened ordered list");
        Ok(Self {
            page_size,
            file: LockedFile::new(file, header),
            _pointer: PhantomData,
        })
    }

    /// Entry capacity of one page
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pages allocated so far, including emptied ones
    pub fn page_count(&self) -> u64 {
        self.file.lock().header.pages
    }

    /// Number of live entries
    pub fn len(&self) -> Result<u64> {
        let mut guard = self.file.lock();
        let mut total = 0;
        let mut offset = guard.header.first_page_offset;
        while offset != 0 {
            let page = self.read_page(&mut guard, offset)?;
            total += page.len() as u64;
            offset = page.next;
        }
        Ok(total)
    }

    /// True if the list holds no live entries
    pub fn is_empty(&self) -> bool {
        self.file.lock().header.is_empty()
    }

    /// Smallest live order
    pub fn min(&self) -> Option<u64> {
        let header = self.file.lock().header;
        (!header.is_empty()).then_some(header.min)
    }

    /// Largest live order
    pub fn max(&self) -> Option<u64> {
        let header = self.file.lock().header;
        (!header.is_empty()).then_some(header.max)
    }

    /// Add an entry at its sorted position
    pub fn insert(&self, order: u64, pointer: P) -> Result<()> {
        let slot = Slot {
            order,
            data_pos: pointer.raw(),
        };
        let mut guard = self.file.lock();

        if guard.header.first_page_offset == 0 {
            let mut head = self.allocate_page(&mut guard, 0, order)?;
            head.insert_sorted(slot);
            head.write(guard.file.as_mut(), self.page_size)?;
            guard.header.first_page_offset = head.offset;
            note_bounds(&mut guard, order);
            return Ok(());
        }

        let head_offset = guard.header.first_page_offset;
        let mut current = self.read_page(&mut guard, head_offset)?;
        while current.next != 0 {
            let next = self.read_page(&mut guard, current.next)?;
            if order < next.min {
                break;
            }
            current = next;
        }

        if !current.is_full(self.page_size) {
            current.insert_sorted(slot);
            current.write(guard.file.as_mut(), self.page_size)?;
        } else if current.offset == head_offset && order < current.min {
            let mut head = self.allocate_page(&mut guard, current.offset, order)?;
            head.insert_sorted(slot);
            head.write(guard.file.as_mut(), self.page_size)?;
            guard.header.first_page_offset = head.offset;
            debug!(order, page = head.offset, "New ordered head page");
        } else if current.last_order().map_or(true, |last| order >= last) {
            // Falls after everything here and no later than the next page
            let mut page = self.allocate_page(&mut guard, current.next, order)?;
            page.insert_sorted(slot);
            page.write(guard.file.as_mut(), self.page_size)?;
            current.next = page.offset;
            current.write_header(guard.file.as_mut())?;
        } else {
            self.split_insert(&mut guard, current, slot)?;
        }

        note_bounds(&mut guard, order);
        trace!(order, data_pos = slot.data_pos, "Inserted ordered entry");
        Ok(())
    }

    /// Remove the entry matching both `order` and `pointer`
    ///
    /// Returns `Ok(false)` if no such entry exists.
    pub fn remove(&self, order: u64, pointer: P) -> Result<bool> {
        let data_pos = pointer.raw();
        let mut guard = self.file.lock();
        if guard.header.is_empty() {
            return Ok(false);
        }

        let mut offset = guard.header.first_page_offset;
        let mut started = false;
        while offset != 0 {
            let mut page = self.read_page(&mut guard, offset)?;
            if !started {
                // Skip pages that end before `order`
                if page.next != 0 {
                    let next = self.read_page(&mut guard, page.next)?;
                    if next.min < order {
                        offset = page.next;
                        continue;
                    }
                }
                started = true;
            } else if page.min > order {
                break;
            }

            let found = page
                .entries
                .iter()
                .position(|slot| slot.order == order && slot.data_pos == data_pos);
            if let Some(index) = found {
                page.clear_entry(guard.file.as_mut(), index)?;
                if order == guard.header.min || order == guard.header.max {
                    self.refresh_bounds(&mut guard)?;
                }
                trace!(order, data_pos, page = offset, "Removed ordered entry");
                return Ok(true);
            }
            offset = page.next;
        }
        Ok(false)
    }

    /// Lazily iterate live entries of `page_count` pages, starting at the
    /// `start_page`-th page of the chain
    ///
    /// The list is locked once per page, not for the life of the cursor, so
    /// a concurrent writer may be observed part way through.
    pub fn page_iterate(&self, start_page: u64, page_count: u64) -> PageCursor<'_, P> {
        PageCursor::new(self, start_page, page_count, 0, u64::MAX)
    }

    /// Every live entry in order
    pub fn iter(&self) -> PageCursor<'_, P> {
        self.page_iterate(0, u64::MAX)
    }

    /// Live entries with `lo <= order <= hi`, in order
    pub fn range(&self, lo: u64, hi: u64) -> PageCursor<'_, P> {
        PageCursor::new(self, 0, u64::MAX, lo, hi)
    }

    /// Write the header and sync the file
    pub fn flush_header(&self) -> Result<()> {
        self.file.lock().flush()
    }

    /// Flush and release the file
    pub fn close(self) -> Result<()> {
        self.file.into_inner().flush()
    }

    /// Load the page at `offset`, or the head page when `offset` is 0
    pub(crate) fn load_page(&self, offset: u64) -> Result<Option<Page>> {
        let mut guard = self.file.lock();
        let offset = if offset == 0 {
            guard.header.first_page_offset
        } else {
            offset
        };
        if offset == 0 {
            return Ok(None);
        }
        self.read_page(&mut guard, offset).map(Some)
    }

    fn read_page(&self, state: &mut State, offset: u64) -> Result<Page> {
        let end = ORDERED_HEADER_SIZE + state.header.pages * page_bytes(self.page_size);
        if offset < ORDERED_HEADER_SIZE || offset + page_bytes(self.page_size) > end {
            return Err(Error::Corruption(format!(
                "page offset {} outside the {} allocated pages",
                offset, state.header.pages
            )));
        }
        Page::read(state.file.as_mut(), offset, self.page_size)
    }

    /// Reserve a page at the end of the file; the caller writes it
    fn allocate_page(&self, state: &mut State, next: u64, min: u64) -> Result<Page> {
        let offset = ORDERED_HEADER_SIZE + state.header.pages * page_bytes(self.page_size);
        state.header.pages += 1;
        debug!(page = offset, pages = state.header.pages, "Allocated ordered page");
        Ok(Page::empty(offset, next, min))
    }

    /// Move the upper half of a full page to a new page linked right after
    /// it, then insert into whichever half covers `slot`
    fn split_insert(&self, state: &mut State, mut page: Page, slot: Slot) -> Result<()> {
        let mid = page.len() / 2;
        let upper = page.entries.split_off(mid);
        let mut sibling = self.allocate_page(state, page.next, upper[0].order)?;
        sibling.entries = upper;
        page.next = sibling.offset;

        if slot.order >= sibling.min {
            sibling.insert_sorted(slot);
        } else {
            page.insert_sorted(slot);
        }
        sibling.write(state.file.as_mut(), self.page_size)?;
        page.write(state.file.as_mut(), self.page_size)?;
        debug!(
            page = page.offset,
            sibling = sibling.offset,
            "Split ordered page"
        );
        Ok(())
    }

    /// Rescan the chain for the list-wide bounds
    fn refresh_bounds(&self, state: &mut State) -> Result<()> {
        let mut min = u64::MAX;
        let mut max = 0;
        let mut offset = state.header.first_page_offset;
        while offset != 0 {
            let page = self.read_page(state, offset)?;
            if let (Some(first), Some(last)) = (page.entries.first(), page.entries.last()) {
                min = min.min(first.order);
                max = max.max(last.order);
            }
            offset = page.next;
        }
        state.header.min = min;
        state.header.max = max;
        Ok(())
    }
}

fn note_bounds(state: &mut State, order: u64) {
    state.header.min = state.header.min.min(order);
    state.header.max = state.header.max.max(order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;
    use burrow_core::Location;
    use proptest::prelude::*;

    fn list(page_size: usize) -> OrderedList<Location> {
        OrderedList::create(Box::new(MemoryFile::new()), page_size).unwrap()
    }

    fn loc(n: u64) -> Location {
        Location::new(8 + n * 8)
    }

    fn orders(list: &OrderedList<Location>) -> Vec<u64> {
        list.iter().map(|e| e.unwrap().order).collect()
    }

    fn page_mins(list: &OrderedList<Location>) -> Vec<(u64, usize)> {
        let mut out = Vec::new();
        let mut offset = 0;
        while let Some(page) = list.load_page(offset).unwrap() {
            out.push((page.min, page.len()));
            if page.next == 0 {
                break;
            }
            offset = page.next;
        }
        out
    }

    #[test]
    fn test_empty_list() {
        let list = list(4);
        assert!(list.is_empty());
        assert_eq!(list.len().unwrap(), 0);
        assert_eq!(list.min(), None);
        assert_eq!(list.max(), None);
        assert_eq!(list.page_count(), 0);
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn test_inserts_come_back_sorted() {
        let list = list(4);
        for (i, order) in [50, 10, 40, 20, 30, 60, 5, 45].into_iter().enumerate() {
            list.insert(order, loc(i as u64)).unwrap();
        }
        assert_eq!(orders(&list), vec![5, 10, 20, 30, 40, 45, 50, 60]);
        assert_eq!(list.len().unwrap(), 8);
        assert_eq!(list.min(), Some(5));
        assert_eq!(list.max(), Some(60));
        assert!(list.page_count() >= 2);
    }

    #[test]
    fn test_smaller_than_full_head_gets_new_head() {
        let list = list(2);
        list.insert(10, loc(0)).unwrap();
        list.insert(20, loc(1)).unwrap();
        list.insert(5, loc(2)).unwrap();
        assert_eq!(page_mins(&list), vec![(5, 1), (10, 2)]);
        assert_eq!(orders(&list), vec![5, 10, 20]);
    }

    #[test]
    fn test_append_past_full_page_links_new_page() {
        let list = list(2);
        list.insert(10, loc(0)).unwrap();
        list.insert(20, loc(1)).unwrap();
        list.insert(30, loc(2)).unwrap();
        assert_eq!(page_mins(&list), vec![(10, 2), (30, 1)]);
    }

    #[test]
    fn test_insert_between_full_pages() {
        let list = list(2);
        for (i, order) in [10, 20, 30, 40].into_iter().enumerate() {
            list.insert(order, loc(i as u64)).unwrap();
        }
        assert_eq!(page_mins(&list), vec![(10, 2), (30, 2)]);
        list.insert(25, loc(9)).unwrap();
        assert_eq!(page_mins(&list), vec![(10, 2), (25, 1), (30, 2)]);
        assert_eq!(orders(&list), vec![10, 20, 25, 30, 40]);
    }

    #[test]
    fn test_full_page_splits_around_insert() {
        let list = list(4);
        for (i, order) in [10, 20, 30, 40].into_iter().enumerate() {
            list.insert(order, loc(i as u64)).unwrap();
        }
        list.insert(25, loc(9)).unwrap();
        assert_eq!(page_mins(&list), vec![(10, 3), (30, 2)]);
        assert_eq!(orders(&list), vec![10, 20, 25, 30, 40]);
    }

    #[test]
    fn test_duplicates_removed_by_pointer() {
        let list = list(2);
        for i in 0..5 {
            list.insert(7, loc(i)).unwrap();
        }
        assert_eq!(list.len().unwrap(), 5);
        assert!(list.remove(7, loc(3)).unwrap());
        assert!(!list.remove(7, loc(3)).unwrap());
        assert!(!list.remove(8, loc(0)).unwrap());

        let remaining: Vec<Location> = list.iter().map(|e| e.unwrap().pointer).collect();
        assert_eq!(remaining.len(), 4);
        assert!(!remaining.contains(&loc(3)));
    }

    #[test]
    fn test_remove_recomputes_page_min_and_bounds() {
        let list = list(2);
        for (i, order) in [10, 20, 30, 40].into_iter().enumerate() {
            list.insert(order, loc(i as u64)).unwrap();
        }
        assert!(list.remove(30, loc(2)).unwrap());
        assert_eq!(page_mins(&list), vec![(10, 2), (40, 1)]);
        assert!(list.remove(40, loc(3)).unwrap());
        // emptied page keeps its min
        assert_eq!(page_mins(&list), vec![(10, 2), (40, 0)]);
        assert_eq!(list.max(), Some(20));
        assert!(list.remove(10, loc(0)).unwrap());
        assert_eq!(list.min(), Some(20));
        assert!(list.remove(20, loc(1)).unwrap());
        assert!(list.is_empty());
        assert_eq!(list.min(), None);
    }

    #[test]
    fn test_emptied_page_is_refilled() {
        let list = list(2);
        for (i, order) in [10, 20, 30, 40].into_iter().enumerate() {
            list.insert(order, loc(i as u64)).unwrap();
        }
        list.remove(30, loc(2)).unwrap();
        list.remove(40, loc(3)).unwrap();
        let pages = list.page_count();
        list.insert(50, loc(7)).unwrap();
        assert_eq!(list.page_count(), pages);
        assert_eq!(orders(&list), vec![10, 20, 50]);
    }

    #[test]
    fn test_page_iterate_window() {
        let list = list(2);
        for (i, order) in [10, 20, 30, 40, 50, 60].into_iter().enumerate() {
            list.insert(order, loc(i as u64)).unwrap();
        }
        let window: Vec<u64> = list
            .page_iterate(1, 1)
            .map(|e| e.unwrap().order)
            .collect();
        assert_eq!(window, vec![30, 40]);
        assert_eq!(list.page_iterate(3, 2).count(), 0);
    }

    #[test]
    fn test_range_is_inclusive() {
        let list = list(3);
        for i in 0..20u64 {
            list.insert(i * 10, loc(i)).unwrap();
        }
        let found: Vec<u64> = list.range(35, 90).map(|e| e.unwrap().order).collect();
        assert_eq!(found, vec![40, 50, 60, 70, 80, 90]);
        assert_eq!(list.range(1000, 2000).count(), 0);
    }

    #[test]
    fn test_page_size_one() {
        let list = list(1);
        for (i, order) in [3, 1, 2, 5, 4].into_iter().enumerate() {
            list.insert(order, loc(i as u64)).unwrap();
        }
        assert_eq!(orders(&list), vec![1, 2, 3, 4, 5]);
        assert_eq!(list.page_count(), 5);
    }

    #[test]
    fn test_reopen() {
        let list = list(4);
        for i in 0..10u64 {
            list.insert(100 - i, loc(i)).unwrap();
        }
        let state = list.file.into_inner();
        let reopened = OrderedList::<Location>::open(state.file, 4).unwrap();
        assert_eq!(reopened.len().unwrap(), 10);
        assert_eq!(reopened.min(), Some(91));
        assert_eq!(reopened.max(), Some(100));
        assert_eq!(orders(&reopened), (91..=100).collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "page size")]
    fn test_zero_page_size_panics() {
        let _ = list(0);
    }

    /// Walk the chain and check page mins and ordering across pages
    fn check_chain(list: &OrderedList<Location>) -> std::result::Result<(), String> {
        let mut offset = 0;
        let mut previous_min = 0;
        let mut previous_last = 0;
        let mut head = true;
        while let Some(page) = list.load_page(offset).map_err(|e| e.to_string())? {
            if page.min < previous_min {
                return Err(format!("page @{} min {} below {}", page.offset, page.min, previous_min));
            }
            if let Some(first) = page.entries.first() {
                if !head && page.min != first.order {
                    return Err(format!(
                        "page @{} min {} but smallest entry {}",
                        page.offset, page.min, first.order
                    ));
                }
                if first.order < previous_last {
                    return Err(format!(
                        "page @{} starts at {} after an entry {}",
                        page.offset, first.order, previous_last
                    ));
                }
                if page.entries.windows(2).any(|w| w[0].order > w[1].order) {
                    return Err(format!("page @{} entries out of order", page.offset));
                }
                previous_last = page.entries[page.entries.len() - 1].order;
            }
            previous_min = page.min;
            head = false;
            if page.next == 0 {
                break;
            }
            offset = page.next;
        }
        Ok(())
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u64),
        Remove(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u64..40).prop_map(Op::Insert),
            2 => any::<usize>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_page_mins_track_live_entries(
            page_size in 1usize..5,
            ops in proptest::collection::vec(op_strategy(), 1..200),
        ) {
            let list = list(page_size);
            let mut live: Vec<(u64, Location)> = Vec::new();
            let mut next_id = 0;

            for op in ops {
                match op {
                    Op::Insert(order) => {
                        let pointer = loc(next_id);
                        next_id += 1;
                        list.insert(order, pointer).unwrap();
                        live.push((order, pointer));
                    }
                    Op::Remove(pick) => {
                        if live.is_empty() {
                            continue;
                        }
                        let (order, pointer) = live.swap_remove(pick % live.len());
                        prop_assert!(list.remove(order, pointer).unwrap());
                    }
                }
                if let Err(msg) = check_chain(&list) {
                    prop_assert!(false, "{}", msg);
                }
                prop_assert_eq!(list.len().unwrap(), live.len() as u64);
            }

            let mut expected: Vec<u64> = live.iter().map(|(order, _)| *order).collect();
            expected.sort_unstable();
            prop_assert_eq!(orders(&list), expected);
        }
    }
}
