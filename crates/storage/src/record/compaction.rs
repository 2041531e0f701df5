//! Free-space compaction
//!
//! Compaction slides every live byte range down over the free blocks before
//! it and truncates the file. Records move, so every Location handed out
//! before the call is stale afterwards. The returned [`RelocationMap`] says
//! where each old Location went.

use burrow_core::{Error, Location, Result};
use tracing::{debug, info};

use super::free_list::{self, FreeBlock};
use super::StoreHeader;
use crate::header::FileState;

const COPY_CHUNK: usize = 64 * 1024;

/// A contiguous byte range that moved down by `shift` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    /// First byte of the range before compaction
    pub start: u64,
    /// One past the last byte before compaction
    pub end: u64,
    /// Distance moved toward the start of the file
    pub shift: u64,
}

/// Old-to-new Location mapping produced by `RecordStore::compact`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationMap {
    /// Offsets below this did not move
    stable_below: u64,
    /// Moved ranges, sorted by `start`
    moves: Vec<Move>,
    /// Bytes reclaimed
    reclaimed: u64,
}

impl RelocationMap {
    fn identity() -> Self {
        Self {
            stable_below: u64::MAX,
            moves: Vec::new(),
            reclaimed: 0,
        }
    }

    /// New Location of a record that lived at `old`
    ///
    /// `None` if `old` pointed into reclaimed free space.
    pub fn relocate(&self, old: Location) -> Option<Location> {
        let offset = old.offset();
        if offset < self.stable_below {
            return Some(old);
        }
        let idx = self.moves.partition_point(|m| m.end <= offset);
        self.moves
            .get(idx)
            .filter(|m| m.start <= offset)
            .map(|m| Location::new(offset - m.shift))
    }

    /// True if nothing moved
    pub fn is_identity(&self) -> bool {
        self.moves.is_empty()
    }

    /// Ranges that moved
    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// Bytes returned to the file system
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed
    }
}

/// Copy `[src, src + len)` to `dest`, with `dest < src`
fn shift_down(state: &mut FileState<StoreHeader>, src: u64, dest: u64, len: u64) -> Result<()> {
    let mut buf = vec![0u8; COPY_CHUNK.min(len as usize)];
    let mut done = 0u64;
    while done < len {
        let n = ((len - done) as usize).min(buf.len());
        state.file.read_at(src + done, &mut buf[..n])?;
        state.file.write_at(dest + done, &buf[..n])?;
        done += n as u64;
    }
    Ok(())
}

pub(crate) fn compact(state: &mut FileState<StoreHeader>) -> Result<RelocationMap> {
    let mut blocks: Vec<FreeBlock> = free_list::blocks(state)?;
    if blocks.is_empty() {
        return Ok(RelocationMap::identity());
    }
    blocks.sort_by_key(|b| b.offset);

    let file_len = state.file.len()?;
    for pair in blocks.windows(2) {
        if pair[0].end() > pair[1].offset {
            return Err(Error::Corruption(format!(
                "free blocks at {} and {} overlap",
                pair[0].offset, pair[1].offset
            )));
        }
    }
    if let Some(last) = blocks.last() {
        if last.end() > file_len {
            return Err(Error::Corruption(format!(
                "free block at {} runs past end of file",
                last.offset
            )));
        }
    }

    let mut map = RelocationMap {
        stable_below: blocks[0].offset,
        moves: Vec::with_capacity(blocks.len()),
        reclaimed: 0,
    };

    let mut dest = blocks[0].offset;
    for (i, block) in blocks.iter().enumerate() {
        let live_start = block.end();
        let live_end = blocks.get(i + 1).map_or(file_len, |next| next.offset);
        if live_end > live_start {
            let len = live_end - live_start;
            shift_down(state, live_start, dest, len)?;
            map.moves.push(Move {
                start: live_start,
                end: live_end,
                shift: live_start - dest,
            });
            debug!(from = live_start, to = dest, len, "Shifted live range");
            dest += len;
        }
    }

    state.file.set_len(dest)?;
    state.header.free = 0;
    map.reclaimed = file_len - dest;

    info!(
        free_blocks = blocks.len(),
        reclaimed = map.reclaimed,
        new_size = dest,
        "Compacted record store"
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_map() {
        let map = RelocationMap::identity();
        assert!(map.is_identity());
        assert_eq!(map.relocate(Location::new(99)), Some(Location::new(99)));
    }

    #[test]
    fn test_relocate_through_moves() {
        // Free [8, 40) and [60, 80); live [40, 60) and [80, 100)
        let map = RelocationMap {
            stable_below: 8,
            moves: vec![
                Move {
                    start: 40,
                    end: 60,
                    shift: 32,
                },
                Move {
                    start: 80,
                    end: 100,
                    shift: 52,
                },
            ],
            reclaimed: 52,
        };
        assert_eq!(map.relocate(Location::new(8)), None);
        assert_eq!(map.relocate(Location::new(40)), Some(Location::new(8)));
        assert_eq!(map.relocate(Location::new(59)), Some(Location::new(27)));
        assert_eq!(map.relocate(Location::new(70)), None);
        assert_eq!(map.relocate(Location::new(80)), Some(Location::new(28)));
        assert_eq!(map.relocate(Location::new(100)), None);
    }
}
