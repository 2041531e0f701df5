//! Lazy page-by-page iteration

use burrow_core::{Pointer, Result};

use super::page::Slot;
use super::{OrderedEntry, OrderedList};

/// Iterator over the live entries of a window of pages
///
/// Created by [`OrderedList::page_iterate`], [`OrderedList::iter`] and
/// [`OrderedList::range`]. Pages are read one at a time as the cursor
/// reaches them. An I/O error is yielded once and ends the iteration.
pub struct PageCursor<'a, P: Pointer> {
    list: &'a OrderedList<P>,
    /// Next page to load; `Some(0)` is the head
    next_page: Option<u64>,
    skip: u64,
    remaining: u64,
    lo: u64,
    hi: u64,
    buffer: std::vec::IntoIter<Slot>,
}

impl<'a, P: Pointer> PageCursor<'a, P> {
    pub(super) fn new(
        list: &'a OrderedList<P>,
        start_page: u64,
        page_count: u64,
        lo: u64,
        hi: u64,
    ) -> Self {
        Self {
            list,
            next_page: Some(0),
            skip: start_page,
            remaining: page_count,
            lo,
            hi,
            buffer: Vec::new().into_iter(),
        }
    }

    fn finish(&mut self) {
        self.next_page = None;
        self.buffer = Vec::new().into_iter();
    }
}

impl<P: Pointer> Iterator for PageCursor<'_, P> {
    type Item = Result<OrderedEntry<P>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(slot) = self.buffer.next() {
                if slot.order < self.lo {
                    continue;
                }
                if slot.order > self.hi {
                    self.finish();
                    return None;
                }
                return Some(Ok(OrderedEntry {
                    order: slot.order,
                    pointer: P::from_raw(slot.data_pos),
                }));
            }

            let offset = self.next_page?;
            if self.remaining == 0 {
                self.finish();
                return None;
            }
            let page = match self.list.load_page(offset) {
                Ok(Some(page)) => page,
                Ok(None) => {
                    self.finish();
                    return None;
                }
                Err(e) => {
                    self.finish();
                    return Some(Err(e));
                }
            };
            self.next_page = (page.next != 0).then_some(page.next);

            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            // Later pages start no lower than this one
            if page.min > self.hi {
                self.finish();
                return None;
            }
            self.remaining -= 1;
            self.buffer = page.entries.into_iter();
        }
    }
}
