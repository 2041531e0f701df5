//! Slot states and probe sequences
//!
//! A cell is 0 (empty), 1 (tombstone) or a stored pointer. Probing is
//! triangular: the p-th candidate is `start + (p² + p) / 2` modulo a power of
//! two, which visits every cell of that modulus exactly once.

/// Cell value of a removed entry
pub(crate) const TOMBSTONE: u64 = 1;

/// Decoded state of one hash cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Never written. Ends every probe sequence that reaches it.
    Empty,
    /// Previously occupied. Probes continue past it; inserts may claim it.
    Tombstone,
    /// Holds a stored pointer
    Occupied(u64),
}

impl SlotState {
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            0 => SlotState::Empty,
            TOMBSTONE => SlotState::Tombstone,
            other => SlotState::Occupied(other),
        }
    }
}

/// Where a hash lands in the current resize generation
///
/// Buckets below `resize_slots` have already been split and address the
/// doubled table; the rest still address the base table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub slots: u64,
    pub resize_slots: u64,
}

impl Geometry {
    /// Base-table bucket of `hash`
    pub fn bucket(&self, hash: u64) -> u64 {
        hash & (self.slots - 1)
    }

    /// Probe sequence for `hash`
    pub fn probe(&self, hash: u64) -> ProbeSequence {
        let bucket = self.bucket(hash);
        if bucket < self.resize_slots {
            let modulus = self.slots * 2;
            ProbeSequence::new(hash & (modulus - 1), modulus)
        } else {
            ProbeSequence::new(bucket, self.slots)
        }
    }
}

/// Finite, restartable sequence of candidate cell positions
#[derive(Debug, Clone)]
pub(crate) struct ProbeSequence {
    start: u64,
    modulus: u64,
    step: u64,
    offset: u64,
}

impl ProbeSequence {
    /// Probe from `start` modulo `modulus`, which must be a power of two
    pub fn new(start: u64, modulus: u64) -> Self {
        debug_assert!(modulus.is_power_of_two());
        Self {
            start,
            modulus,
            step: 0,
            offset: 0,
        }
    }
}

impl Iterator for ProbeSequence {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.step >= self.modulus {
            return None;
        }
        // offset = (step² + step) / 2, kept reduced
        self.offset = (self.offset + self.step) & (self.modulus - 1);
        self.step += 1;
        Some((self.start + self.offset) & (self.modulus - 1))
    }
}
