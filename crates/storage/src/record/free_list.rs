//! Size-sorted free list
//!
//! Reclaimed byte ranges are linked through the record store file itself.
//! Each free block starts with `size:u64, next:u64`; the list head lives in
//! the store header. The list is kept sorted by descending size, so the walk
//! for an allocation can stop as soon as blocks get too small.

use burrow_core::{Error, Result, FREE_BLOCK_HEADER_SIZE, MIN_RECORD_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use super::StoreHeader;
use crate::header::FileState;

/// A free byte range in the record store file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// File offset of the block
    pub offset: u64,
    /// Size of the block in bytes
    pub size: u64,
    /// Offset of the next block in the list (0 = end)
    pub next: u64,
}

impl FreeBlock {
    /// One past the last byte of the block
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

type State = FileState<StoreHeader>;

fn read_block(state: &mut State, offset: u64) -> Result<FreeBlock> {
    let mut buf = [0u8; FREE_BLOCK_HEADER_SIZE as usize];
    state.file.read_at(offset, &mut buf)?;
    Ok(FreeBlock {
        offset,
        size: LittleEndian::read_u64(&buf[0..8]),
        next: LittleEndian::read_u64(&buf[8..16]),
    })
}

fn write_block(state: &mut State, block: &FreeBlock) -> Result<()> {
    let mut buf = [0u8; FREE_BLOCK_HEADER_SIZE as usize];
    LittleEndian::write_u64(&mut buf[0..8], block.size);
    LittleEndian::write_u64(&mut buf[8..16], block.next);
    state.file.write_at(block.offset, &buf)?;
    Ok(())
}

/// Point `prev` (or the list head when `prev` is `None`) at `next`
fn relink(state: &mut State, prev: Option<FreeBlock>, next: u64) -> Result<()> {
    match prev {
        Some(mut block) => {
            block.next = next;
            write_block(state, &block)
        }
        None => {
            state.header.free = next;
            Ok(())
        }
    }
}

/// Upper bound on list length, used to detect a cycle in a corrupted list
fn max_blocks(state: &State) -> Result<u64> {
    Ok(state.file.len()? / FREE_BLOCK_HEADER_SIZE + 1)
}

/// Collect the free list in list order
pub(crate) fn blocks(state: &mut State) -> Result<Vec<FreeBlock>> {
    let limit = max_blocks(state)?;
    let mut out = Vec::new();
    let mut cursor = state.header.free;
    while cursor != 0 {
        if out.len() as u64 >= limit {
            return Err(Error::Corruption("free list does not terminate".to_string()));
        }
        let block = read_block(state, cursor)?;
        cursor = block.next;
        out.push(block);
    }
    Ok(out)
}

/// Link the range `[offset, offset + size)` into the list at its sorted position
pub(crate) fn insert(state: &mut State, offset: u64, size: u64) -> Result<()> {
    debug_assert!(size >= MIN_RECORD_SIZE);
    let limit = max_blocks(state)?;

    let mut prev: Option<FreeBlock> = None;
    let mut cursor = state.header.free;
    let mut steps = 0u64;
    while cursor != 0 {
        let block = read_block(state, cursor)?;
        if block.size < size {
            break;
        }
        steps += 1;
        if steps > limit {
            return Err(Error::Corruption("free list does not terminate".to_string()));
        }
        cursor = block.next;
        prev = Some(block);
    }

    write_block(
        state,
        &FreeBlock {
            offset,
            size,
            next: cursor,
        },
    )?;
    relink(state, prev, offset)?;
    trace!(offset, size, "Inserted free block");
    Ok(())
}

/// Take `size` bytes from the free list, if any block is large enough
///
/// An exact-size block is reused whole. Otherwise the smallest block that
/// fits is split: the record takes its front, and the residual goes back on
/// the list when it can hold a free block header. A smaller residual stays
/// behind the record as unreachable waste.
pub(crate) fn take(state: &mut State, size: u64) -> Result<Option<u64>> {
    let limit = max_blocks(state)?;

    // Best fit: the last block in descending order that still fits
    let mut best: Option<(Option<FreeBlock>, FreeBlock)> = None;
    let mut prev: Option<FreeBlock> = None;
    let mut cursor = state.header.free;
    let mut steps = 0u64;
    while cursor != 0 {
        let block = read_block(state, cursor)?;
        if block.size < size {
            break;
        }
        steps += 1;
        if steps > limit {
            return Err(Error::Corruption("free list does not terminate".to_string()));
        }
        let exact = block.size == size;
        best = Some((prev, block));
        if exact {
            break;
        }
        cursor = block.next;
        prev = Some(block);
    }

    let Some((prev, block)) = best else {
        return Ok(None);
    };

    relink(state, prev, block.next)?;

    let residual = block.size - size;
    if residual >= MIN_RECORD_SIZE {
        insert(state, block.offset + size, residual)?;
    } else if residual > 0 {
        trace!(offset = block.offset, residual, "Retaining allocation residual");
    }

    trace!(offset = block.offset, size, block_size = block.size, "Reused free block");
    Ok(Some(block.offset))
}
