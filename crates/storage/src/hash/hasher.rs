//! Seeded key hashing
//!
//! Each hash index owns a random 128-bit seed, stored in its header as four
//! `u32`s, so bucket placement is stable across reopen but differs between
//! indexes.

use rand::Rng;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Keyed 64-bit hash over byte strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyHasher {
    seed: [u32; 4],
}

impl KeyHasher {
    /// Hasher with an explicit seed
    pub fn new(seed: [u32; 4]) -> Self {
        Self { seed }
    }

    /// Hasher with a fresh random seed
    pub fn random() -> Self {
        Self::new(rand::thread_rng().gen())
    }

    /// The seed as stored in the index header
    pub fn seed(&self) -> [u32; 4] {
        self.seed
    }

    /// Hash `key`
    pub fn hash(&self, key: &[u8]) -> u64 {
        xxh3_64_with_seed(key, self.folded_seed())
    }

    fn folded_seed(&self) -> u64 {
        let lo = u64::from(self.seed[0]) | (u64::from(self.seed[1]) << 32);
        let hi = u64::from(self.seed[2]) | (u64::from(self.seed[3]) << 32);
        lo ^ hi.rotate_left(29)
    }
}
