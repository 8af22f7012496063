//! Bucketized hash table for numeric identifiers
//!
//! General-purpose id-to-object lookup reused by the engine's object
//! tables (an inode cache being the typical consumer). Each bucket holds
//! exactly two slots. Adversarial key distributions are survived by
//! re-randomizing the hash parameters from a per-table seeded source, and
//! persistent overflow by doubling the bucket count; the table only ever
//! grows and keeps no tombstones.

use crate::error::{BlockMapError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

const INITIAL_NBUCKETS: usize = 2;
const BUCKET_SIZE: usize = 2;
const HASH_PRIME: u64 = 32_212_254_719;

/// How many reseed attempts to spend at one table size before doubling.
const REBUILD_TRIES: u32 = 2;

#[derive(Debug, Clone)]
struct Slot<V> {
    key: u64,
    value: V,
}

#[derive(Debug, Clone)]
struct Bucket<V> {
    slots: [Option<Slot<V>>; BUCKET_SIZE],
}

impl<V> Bucket<V> {
    fn empty() -> Self {
        Bucket {
            slots: [None, None],
        }
    }
}

/// Hash table keyed by non-zero `u64` identifiers.
///
/// Values are the caller's handles to externally-owned objects; cloning one
/// during a rebuild must be cheap. Key `0` is reserved as the empty-slot
/// marker and must never be inserted.
#[derive(Debug)]
pub struct HashTable<V> {
    hash_a: u32,
    hash_b: u32,
    hash_p: u64,
    rng: StdRng,
    buckets: Vec<Bucket<V>>,
    entries: usize,
}

impl<V> HashTable<V> {
    /// Create an empty table with an entropy-seeded parameter source.
    pub fn new() -> Result<Self> {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an empty table with a fixed parameter seed, for reproducible
    /// behavior.
    pub fn with_seed(seed: u64) -> Result<Self> {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Result<Self> {
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(INITIAL_NBUCKETS)?;
        buckets.resize_with(INITIAL_NBUCKETS, Bucket::empty);

        let mut table = HashTable {
            hash_a: 0,
            hash_b: 0,
            hash_p: HASH_PRIME,
            rng,
            buckets,
            entries: 0,
        };
        table.rand_params();

        Ok(table)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries
    }

    /// True if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Current bucket count (each bucket holds two slots).
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Re-randomize the multiplicative hash coefficients; `a` must stay
    /// non-zero to keep the hash a permutation over keys.
    fn rand_params(&mut self) {
        loop {
            self.hash_a = self.rng.gen();
            if self.hash_a != 0 {
                break;
            }
        }
        self.hash_b = self.rng.gen();
    }

    fn slot_index(&self, key: u64, nbuckets: usize) -> usize {
        let hash = u64::from(self.hash_a)
            .wrapping_mul(key)
            .wrapping_add(u64::from(self.hash_b))
            % self.hash_p;
        (hash % nbuckets as u64) as usize
    }

    fn bucket_index(&self, key: u64) -> usize {
        self.slot_index(key, self.buckets.len())
    }

    /// Slot position of `key` within its bucket, if present.
    fn position_of(&self, bucket: usize, key: u64) -> Option<usize> {
        self.buckets[bucket]
            .slots
            .iter()
            .position(|slot| matches!(slot, Some(s) if s.key == key))
    }

    /// First free slot position within `bucket`, if any.
    fn free_slot(&self, bucket: usize) -> Option<usize> {
        self.buckets[bucket].slots.iter().position(Option::is_none)
    }

    /// Value stored under `key`, if present.
    pub fn get(&self, key: u64) -> Option<&V> {
        let bucket = &self.buckets[self.bucket_index(key)];
        bucket
            .slots
            .iter()
            .flatten()
            .find(|slot| slot.key == key)
            .map(|slot| &slot.value)
    }

    /// Insert `value` under `key`, returning a reference to the stored
    /// value.
    ///
    /// If the key is already present the existing value is kept and
    /// returned; the new one is dropped. A full target bucket triggers a
    /// rebuild: up to two reseed attempts at the current size, then the
    /// bucket count doubles and the retry budget resets, until the whole
    /// table re-inserts without overflow. Only bucket-array allocation
    /// failure surfaces as an error.
    pub fn put(&mut self, key: u64, value: V) -> Result<&V>
    where
        V: Clone,
    {
        assert_ne!(key, 0, "key 0 is reserved as the empty-slot marker");

        let mut idx = self.bucket_index(key);

        if let Some(pos) = self.position_of(idx, key) {
            return match &self.buckets[idx].slots[pos] {
                Some(slot) => Ok(&slot.value),
                None => unreachable!(),
            };
        }

        let mut free = self.free_slot(idx);
        let mut tries = 0;

        while free.is_none() {
            let mut new_size = self.buckets.len();

            loop {
                if self.entries > 2 * new_size || tries == REBUILD_TRIES {
                    new_size *= 2;
                    tries = 0;
                } else {
                    self.rand_params();
                    tries += 1;
                }

                if self.rebuild(new_size)? {
                    break;
                }
            }

            debug!(nbuckets = self.buckets.len(), "hash table rebuilt");

            idx = self.bucket_index(key);
            free = self.free_slot(idx);
        }

        let pos = match free {
            Some(pos) => pos,
            None => unreachable!(),
        };
        self.buckets[idx].slots[pos] = Some(Slot { key, value });
        self.entries += 1;

        match &self.buckets[idx].slots[pos] {
            Some(slot) => Ok(&slot.value),
            None => unreachable!(),
        }
    }

    /// Re-insert every live entry into a fresh bucket array of `new_size`
    /// under the current hash parameters.
    ///
    /// Returns `Ok(false)` when some bucket overflows, leaving the table
    /// untouched; the caller reseeds or doubles and tries again.
    fn rebuild(&mut self, new_size: usize) -> Result<bool>
    where
        V: Clone,
    {
        let mut new_buckets: Vec<Bucket<V>> = Vec::new();
        new_buckets.try_reserve_exact(new_size)?;
        new_buckets.resize_with(new_size, Bucket::empty);

        for bucket in &self.buckets {
            for slot in bucket.slots.iter().flatten() {
                let idx = self.slot_index(slot.key, new_size);
                match new_buckets[idx].slots.iter_mut().find(|s| s.is_none()) {
                    Some(target) => *target = Some(slot.clone()),
                    None => return Ok(false),
                }
            }
        }

        self.buckets = new_buckets;
        Ok(true)
    }

    /// Clear the slot holding exactly this key/value pair.
    pub fn remove(&mut self, key: u64, value: &V) -> Result<()>
    where
        V: PartialEq,
    {
        let idx = self.bucket_index(key);

        for slot in self.buckets[idx].slots.iter_mut() {
            if matches!(slot, Some(s) if s.key == key && s.value == *value) {
                *slot = None;
                self.entries -= 1;
                return Ok(());
            }
        }

        Err(BlockMapError::EntryNotFound(key))
    }

    /// Invoke `callback` for every live entry; returns the number visited,
    /// which always equals [`len`](Self::len).
    pub fn traverse<F>(&self, mut callback: F) -> usize
    where
        F: FnMut(u64, &V),
    {
        let mut visited = 0;

        for bucket in &self.buckets {
            for slot in bucket.slots.iter().flatten() {
                callback(slot.key, &slot.value);
                visited += 1;
            }
        }

        visited
    }
}
