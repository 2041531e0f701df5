//! Hash index
//!
//! An open-addressed hash table on one record field, mapping key bytes to a
//! stored [`Pointer`]. The table grows by linear hashing: instead of
//! rehashing everything when it gets too full, each insert splits at most
//! [`MAX_SPLITS_PER_INSERT`] base buckets, so no single insert pays for a
//! whole doubling.
//!
//! # File Format
//!
//! ```text
//! +-----------------------------+
//! | seed: [u32; 4] LE           |  bytes 0..16
//! | slots: u64 LE               |  bytes 16..24, base table size (power of two)
//! | resize_slots: u64 LE        |  bytes 24..32, buckets split this generation
//! | resize_lookup_slots: u64 LE |  bytes 32..40, cells allocated past `slots`
//! | reserved: u64               |  bytes 40..48
//! | length: u64 LE              |  bytes 48..56, live entries
//! +-----------------------------+
//! | cell 0: u64 LE              |  0 = empty, 1 = tombstone, else pointer
//! | ...                         |
//! +-----------------------------+
//! ```
//!
//! # Growth
//!
//! While a generation is in progress, buckets `0..resize_slots` have been
//! split and address a table of `2 * slots` cells; the others still address
//! `slots` cells. Splitting bucket `b` walks `b`'s probe chain up to the first
//! empty cell, tombstones every entry whose home bucket is `b`, and reinserts
//! those entries with the doubled modulus. Cells past the allocated array are
//! appended on demand and counted in `resize_lookup_slots`. When every bucket
//! has been split the generation ends: `slots` doubles and both counters
//! reset.
//!
//! An entry whose pointer no longer resolves to a record cannot be rehashed.
//! A split that meets one tombstones it and drops it from `length`.
//!
//! # Locking
//!
//! Key comparison reads the candidate's key field from the record store. The
//! index lock is held across a whole probe; the store lock (and the alias
//! lock, when pointers are AliasRefs) is taken and released once per
//! comparison. Nothing ever locks the store first and then an index.

mod hasher;
mod probe;

pub use hasher::KeyHasher;

use burrow_core::{
    Error, Location, Pointer, Result, SlotRef, HASH_HEADER_SIZE, SLOT_SIZE,
};
use byteorder::{ByteOrder, LittleEndian};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::file::StorageFile;
use crate::header::{FileState, Header, LockedFile};
use crate::record::RecordStore;
use crate::resolver::Resolver;
use probe::{Geometry, ProbeSequence, SlotState, TOMBSTONE};

/// Bucket splits an insert may run before probing.
///
/// Every insert adds one entry and every split adds one bucket of capacity,
/// so two splits per insert are needed to hold the load factor at one half.
pub const MAX_SPLITS_PER_INSERT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HashHeader {
    seed: [u32; 4],
    slots: u64,
    resize_slots: u64,
    resize_lookup_slots: u64,
    length: u64,
}

impl HashHeader {
    fn geometry(&self) -> Geometry {
        Geometry {
            slots: self.slots,
            resize_slots: self.resize_slots,
        }
    }
}

impl Header for HashHeader {
    const SIZE: usize = HASH_HEADER_SIZE as usize;

    fn encode(&self, buf: &mut [u8]) {
        for (i, word) in self.seed.iter().enumerate() {
            LittleEndian::write_u32(&mut buf[i * 4..i * 4 + 4], *word);
        }
        LittleEndian::write_u64(&mut buf[16..24], self.slots);
        LittleEndian::write_u64(&mut buf[24..32], self.resize_slots);
        LittleEndian::write_u64(&mut buf[32..40], self.resize_lookup_slots);
        LittleEndian::write_u64(&mut buf[40..48], 0);
        LittleEndian::write_u64(&mut buf[48..56], self.length);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut seed = [0u32; 4];
        for (i, word) in seed.iter_mut().enumerate() {
            *word = LittleEndian::read_u32(&buf[i * 4..i * 4 + 4]);
        }
        HashHeader {
            seed,
            slots: LittleEndian::read_u64(&buf[16..24]),
            resize_slots: LittleEndian::read_u64(&buf[24..32]),
            resize_lookup_slots: LittleEndian::read_u64(&buf[32..40]),
            length: LittleEndian::read_u64(&buf[48..56]),
        }
    }
}

/// Counters describing the table's current shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashIndexStats {
    /// Base table size of the current generation
    pub slots: u64,
    /// Buckets split so far in this generation
    pub resize_slots: u64,
    /// Cells allocated past `slots` during this generation
    pub resize_lookup_slots: u64,
    /// Live entries
    pub length: u64,
}

impl HashIndexStats {
    /// Addressable capacity: `slots + resize_slots`
    pub fn capacity(&self) -> u64 {
        self.slots + self.resize_slots
    }
}

/// Resizable hash index over one record field
///
/// `P` is what the cells store: [`Location`] with the
/// [`Direct`](crate::Direct) resolver, or [`AliasRef`](burrow_core::AliasRef)
/// with an [`AliasList`](crate::AliasList).
pub struct HashIndex<P: Pointer> {
    store: Arc<RecordStore>,
    resolver: Arc<dyn Resolver<P>>,
    key_field: usize,
    hasher: KeyHasher,
    file: LockedFile<HashHeader>,
    _pointer: PhantomData<P>,
}

type State = FileState<HashHeader>;

impl<P: Pointer> HashIndex<P> {
    /// Initialize an empty index in `file` with a random seed
    ///
    /// # Panics
    ///
    /// Panics if `initial_slots` is not a power of two of at least 2, or if
    /// `key_field` is not a field of `store`.
    pub fn create(
        file: Box<dyn StorageFile>,
        store: Arc<RecordStore>,
        resolver: Arc<dyn Resolver<P>>,
        key_field: usize,
        initial_slots: u64,
    ) -> Result<Self> {
        Self::create_with_hasher(
            file,
            store,
            resolver,
            key_field,
            initial_slots,
            KeyHasher::random(),
        )
    }

    /// Initialize an empty index with an explicit hasher
    ///
    /// # Panics
    ///
    /// Same conditions as [`create`](Self::create).
    pub fn create_with_hasher(
        mut file: Box<dyn StorageFile>,
        store: Arc<RecordStore>,
        resolver: Arc<dyn Resolver<P>>,
        key_field: usize,
        initial_slots: u64,
        hasher: KeyHasher,
    ) -> Result<Self> {
        assert!(
            initial_slots >= 2 && initial_slots.is_power_of_two(),
            "initial slot count {} is not a power of two >= 2",
            initial_slots
        );
        assert!(
            key_field < store.field_count(),
            "key field {} out of range for {}-field store",
            key_field,
            store.field_count()
        );

        let header = HashHeader {
            seed: hasher.seed(),
            slots: initial_slots,
            resize_slots: 0,
            resize_lookup_slots: 0,
            length: 0,
        };
        file.set_len(0)?;
        file.set_len(HASH_HEADER_SIZE + initial_slots * SLOT_SIZE)?;
        header.write_to(file.as_mut())?;
        info!(key_field, slots = initial_slots, "Created hash index");

        Ok(Self {
            store,
            resolver,
            key_field,
            hasher,
            file: LockedFile::new(file, header),
            _pointer: PhantomData,
        })
    }

    /// Open an existing index
    ///
    /// # Panics
    ///
    /// Panics if `key_field` is not a field of `store`.
    pub fn open(
        mut file: Box<dyn StorageFile>,
        store: Arc<RecordStore>,
        resolver: Arc<dyn Resolver<P>>,
        key_field: usize,
    ) -> Result<Self> {
        assert!(
            key_field < store.field_count(),
            "key field {} out of range for {}-field store",
            key_field,
            store.field_count()
        );
        let len = file.len()?;
        if len < HASH_HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "hash index is {} bytes, shorter than its header",
                len
            )));
        }
        let header = HashHeader::read_from(file.as_mut())?;
        if header.slots < 2 || !header.slots.is_power_of_two() {
            return Err(Error::Corruption(format!(
                "hash index slot count {} is not a power of two",
                header.slots
            )));
        }
        if header.resize_slots >= header.slots || header.resize_lookup_slots > header.slots {
            return Err(Error::Corruption(format!(
                "hash index resize counters ({}, {}) exceed slot count {}",
                header.resize_slots, header.resize_lookup_slots, header.slots
            )));
        }
        info!(
            key_field,
            slots = header.slots,
            resize_slots = header.resize_slots,
            length = header.length,
            "Opened hash index"
        );

        Ok(Self {
            store,
            resolver,
            key_field,
            hasher: KeyHasher::new(header.seed),
            file: LockedFile::new(file, header),
            _pointer: PhantomData,
        })
    }

    /// Record field this index is keyed on
    pub fn key_field(&self) -> usize {
        self.key_field
    }

    /// Number of live entries
    pub fn len(&self) -> u64 {
        self.file.lock().header.length
    }

    /// True if the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Addressable capacity of the current generation
    pub fn capacity(&self) -> u64 {
        self.stats().capacity()
    }

    /// Current shape of the table
    pub fn stats(&self) -> HashIndexStats {
        let header = self.file.lock().header;
        HashIndexStats {
            slots: header.slots,
            resize_slots: header.resize_slots,
            resize_lookup_slots: header.resize_lookup_slots,
            length: header.length,
        }
    }

    /// Location of the record whose key field equals `key`
    pub fn find(&self, key: &[u8]) -> Result<Option<Location>> {
        match self.find_pointer(key)? {
            Some((_, pointer)) => self.resolver.resolve(pointer),
            None => Ok(None),
        }
    }

    /// Stored pointer for `key`, with the cell holding it
    pub fn find_pointer(&self, key: &[u8]) -> Result<Option<(SlotRef, P)>> {
        let hash = self.hasher.hash(key);
        let mut guard = self.file.lock();
        Ok(self
            .find_in(&mut guard, key, hash)?
            .map(|(pos, raw)| (slot_ref(pos), P::from_raw(raw))))
    }

    /// Insert or replace the entry for the record `pointer` designates
    ///
    /// Runs at most [`MAX_SPLITS_PER_INSERT`] bucket splits first. If an
    /// entry with the same key exists it is overwritten in place; keys are
    /// never stored twice.
    pub fn insert(&self, pointer: P) -> Result<SlotRef> {
        let key = self.key_for(pointer)?;
        let hash = self.hasher.hash(&key);

        let mut guard = self.file.lock();
        self.resize_step(&mut guard)?;

        if let Some(pos) = self.upsert(&mut guard, &key, hash, pointer.raw())? {
            return Ok(slot_ref(pos));
        }

        warn!(
            slots = guard.header.slots,
            resize_slots = guard.header.resize_slots,
            length = guard.header.length,
            "Probe window saturated, completing resize generation"
        );
        self.finish_generation(&mut guard)?;
        match self.upsert(&mut guard, &key, hash, pointer.raw())? {
            Some(pos) => Ok(slot_ref(pos)),
            None => Err(Error::Corruption("hash index has no free cell".to_string())),
        }
    }

    /// Remove the entry for `key`
    ///
    /// Returns `Ok(false)` if no entry matched.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        let hash = self.hasher.hash(key);
        let mut guard = self.file.lock();
        let Some((pos, _)) = self.find_in(&mut guard, key, hash)? else {
            return Ok(false);
        };
        write_cell(&mut guard, pos, TOMBSTONE)?;
        guard.header.length -= 1;
        trace!(pos, "Removed hash entry");
        Ok(true)
    }

    /// Every stored pointer, in cell order
    pub fn pointers(&self) -> Result<Vec<P>> {
        let mut guard = self.file.lock();
        let cells = guard.header.slots + guard.header.resize_lookup_slots;
        let mut out = Vec::with_capacity(guard.header.length as usize);
        for pos in 0..cells {
            if let SlotState::Occupied(raw) = read_cell(&mut guard, pos)? {
                out.push(P::from_raw(raw));
            }
        }
        Ok(out)
    }

    /// Write the header and sync the file
    pub fn flush_header(&self) -> Result<()> {
        self.file.lock().flush()
    }

    /// Flush and release the file
    pub fn close(self) -> Result<()> {
        self.file.into_inner().flush()
    }

    /// Key bytes of the record `pointer` designates
    fn key_for(&self, pointer: P) -> Result<Vec<u8>> {
        let Some(loc) = self.resolver.resolve(pointer)? else {
            return Err(Error::Corruption(format!(
                "{} does not designate a record",
                pointer
            )));
        };
        self.store
            .read_field(loc, self.key_field)?
            .ok_or(Error::MissingKeyField {
                location: loc,
                field: self.key_field,
            })
    }

    /// Key bytes behind a stored cell, `None` if the record is gone
    fn stored_key(&self, raw: u64) -> Result<Option<Vec<u8>>> {
        match self.resolver.resolve(P::from_raw(raw))? {
            Some(loc) => self.store.read_field(loc, self.key_field),
            None => Ok(None),
        }
    }

    fn find_in(&self, state: &mut State, key: &[u8], hash: u64) -> Result<Option<(u64, u64)>> {
        for pos in state.header.geometry().probe(hash) {
            match read_cell(state, pos)? {
                SlotState::Empty => return Ok(None),
                SlotState::Tombstone => continue,
                SlotState::Occupied(raw) => {
                    if self.stored_key(raw)?.as_deref() == Some(key) {
                        return Ok(Some((pos, raw)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Overwrite the entry for `key`, or claim the first free cell on its
    /// probe sequence. `None` if the sequence has no free cell.
    fn upsert(&self, state: &mut State, key: &[u8], hash: u64, raw: u64) -> Result<Option<u64>> {
        let mut free = None;
        for pos in state.header.geometry().probe(hash) {
            match read_cell(state, pos)? {
                SlotState::Empty => {
                    free.get_or_insert(pos);
                    break;
                }
                SlotState::Tombstone => {
                    free.get_or_insert(pos);
                }
                SlotState::Occupied(existing) => {
                    if self.stored_key(existing)?.as_deref() == Some(key) {
                        write_cell(state, pos, raw)?;
                        trace!(pos, "Replaced hash entry");
                        return Ok(Some(pos));
                    }
                }
            }
        }

        let Some(pos) = free else {
            return Ok(None);
        };
        write_cell(state, pos, raw)?;
        state.header.length += 1;
        trace!(pos, "Inserted hash entry");
        Ok(Some(pos))
    }

    /// Claim the first free cell for an entry known not to be present
    fn place(state: &mut State, hash: u64, raw: u64) -> Result<bool> {
        for pos in state.header.geometry().probe(hash) {
            match read_cell(state, pos)? {
                SlotState::Empty | SlotState::Tombstone => {
                    write_cell(state, pos, raw)?;
                    return Ok(true);
                }
                SlotState::Occupied(_) => {}
            }
        }
        Ok(false)
    }

    /// Split buckets while the load factor is above one half
    fn resize_step(&self, state: &mut State) -> Result<()> {
        for _ in 0..MAX_SPLITS_PER_INSERT {
            let header = state.header;
            if header.length * 2 <= header.slots + header.resize_slots {
                break;
            }
            self.split_bucket(state)?;
        }
        Ok(())
    }

    fn split_bucket(&self, state: &mut State) -> Result<()> {
        let slots = state.header.slots;
        let bucket = state.header.resize_slots;

        // Every entry homed at `bucket` sits on its chain before the first
        // empty cell.
        let mut moving = Vec::new();
        let mut dangling = Vec::new();
        for pos in ProbeSequence::new(bucket, slots) {
            match read_cell(state, pos)? {
                SlotState::Empty => break,
                SlotState::Tombstone => {}
                SlotState::Occupied(raw) => {
                    let Some(key) = self.stored_key(raw)? else {
                        dangling.push(pos);
                        continue;
                    };
                    let hash = self.hasher.hash(&key);
                    if state.header.geometry().bucket(hash) == bucket {
                        moving.push((pos, raw, hash));
                    }
                }
            }
        }

        // An entry with no record behind it can never be rehashed, so it
        // would sit unreachable after the generation ends
        for pos in &dangling {
            warn!(pos, bucket, "Dropping hash entry that designates no record");
            write_cell(state, *pos, TOMBSTONE)?;
        }
        state.header.length -= dangling.len() as u64;

        for (pos, _, _) in &moving {
            write_cell(state, *pos, TOMBSTONE)?;
        }
        state.header.resize_slots += 1;
        for (_, raw, hash) in &moving {
            if !Self::place(state, *hash, *raw)? {
                return Err(Error::Corruption(format!(
                    "no free cell while splitting bucket {}",
                    bucket
                )));
            }
        }
        trace!(bucket, moved = moving.len(), "Split hash bucket");

        if state.header.resize_slots == slots {
            complete_generation(state)?;
        }
        Ok(())
    }

    /// Split every remaining bucket of the current generation
    fn finish_generation(&self, state: &mut State) -> Result<()> {
        let slots = state.header.slots;
        while state.header.slots == slots {
            self.split_bucket(state)?;
        }
        Ok(())
    }
}

fn slot_ref(pos: u64) -> SlotRef {
    SlotRef::new(HASH_HEADER_SIZE + pos * SLOT_SIZE)
}

fn read_cell(state: &mut State, pos: u64) -> Result<SlotState> {
    let mut buf = [0u8; SLOT_SIZE as usize];
    state
        .file
        .read_at_or_zero(HASH_HEADER_SIZE + pos * SLOT_SIZE, &mut buf)?;
    Ok(SlotState::from_raw(LittleEndian::read_u64(&buf)))
}

fn write_cell(state: &mut State, pos: u64, raw: u64) -> Result<()> {
    let allocated = state.header.slots + state.header.resize_lookup_slots;
    if pos >= allocated {
        state.header.resize_lookup_slots = pos + 1 - state.header.slots;
        trace!(
            pos,
            lookup_slots = state.header.resize_lookup_slots,
            "Appending lookup slots"
        );
    }
    let mut buf = [0u8; SLOT_SIZE as usize];
    LittleEndian::write_u64(&mut buf, raw);
    state
        .file
        .write_at(HASH_HEADER_SIZE + pos * SLOT_SIZE, &buf)?;
    Ok(())
}

/// Every bucket is split: the doubled table becomes the base table
fn complete_generation(state: &mut State) -> Result<()> {
    let slots = state.header.slots * 2;
    let needed = HASH_HEADER_SIZE + slots * SLOT_SIZE;
    if state.file.len()? < needed {
        state.file.set_len(needed)?;
    }
    state.header.slots = slots;
    state.header.resize_slots = 0;
    state.header.resize_lookup_slots = 0;
    debug!(slots, length = state.header.length, "Hash index doubled");
    Ok(())
}
