//! Bucketed cuckoo hash table mapping entity keys to address lists.
//!
//! Full keys are stored, so lookups are exact. Inserts displace existing
//! entries between their two candidate buckets for at most [`MAX_KICKS`]
//! steps; when that is not enough the table is restored and the insert is
//! reported as a capacity error.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

use crate::error::{Error, Result};
use crate::forest::PairId;

pub const SLOTS_PER_BUCKET: usize = 4;
pub const MAX_KICKS: usize = 500;

const HASH_SEEDS: [u64; 2] = [0x9e37_79b9_7f4a_7c15, 0xc2b2_ae3d_27d4_eb4f];
const VICTIM_SEED: u64 = 0x5eed;

/// Backing key/value store for the entity index.
pub trait AddressStore: Send + Sync {
    /// Reset the store to hold up to `capacity` keys.
    fn initialize(&mut self, capacity: usize) -> Result<()>;

    /// Insert or overwrite the values for `key`.
    fn set(&mut self, key: &str, values: Vec<PairId>) -> Result<()>;

    fn get(&self, key: &str) -> Option<Vec<PairId>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    fn is_initialized(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    key: String,
    values: Vec<PairId>,
}

#[derive(Debug, Clone)]
pub struct CuckooAddressStore {
    buckets: Vec<Vec<Slot>>,
    capacity: usize,
    len: usize,
    rng: StdRng,
}

impl Default for CuckooAddressStore {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
            capacity: 0,
            len: 0,
            rng: StdRng::seed_from_u64(VICTIM_SEED),
        }
    }
}

impl CuckooAddressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut store = Self::new();
        store.initialize(capacity)?;
        Ok(store)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, key: &str, which: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        HASH_SEEDS[which].hash(&mut hasher);
        key.hash(&mut hasher);
        // bucket count is a power of two
        (hasher.finish() as usize) & (self.buckets.len() - 1)
    }

    fn candidates(&self, key: &str) -> [usize; 2] {
        [self.bucket_index(key, 0), self.bucket_index(key, 1)]
    }

    fn find(&self, key: &str) -> Option<(usize, usize)> {
        self.candidates(key).into_iter().find_map(|b| {
            self.buckets[b]
                .iter()
                .position(|slot| slot.key == key)
                .map(|i| (b, i))
        })
    }

    fn insert_new(&mut self, slot: Slot) -> Result<()> {
        let [first, second] = self.candidates(&slot.key);
        for b in [first, second] {
            if self.buckets[b].len() < SLOTS_PER_BUCKET {
                self.buckets[b].push(slot);
                self.len += 1;
                return Ok(());
            }
        }

        let key = slot.key.clone();
        let mut carried = slot;
        let mut bucket = if self.rng.gen_bool(0.5) { first } else { second };
        let mut swaps: Vec<(usize, usize)> = Vec::new();

        for _ in 0..MAX_KICKS {
            let victim = self.rng.gen_range(0..SLOTS_PER_BUCKET);
            std::mem::swap(&mut carried, &mut self.buckets[bucket][victim]);
            swaps.push((bucket, victim));

            let [a, b] = self.candidates(&carried.key);
            let alternate = if a == bucket { b } else { a };
            if self.buckets[alternate].len() < SLOTS_PER_BUCKET {
                self.buckets[alternate].push(carried);
                self.len += 1;
                debug!(kicks = swaps.len(), "cuckoo insert displaced entries");
                return Ok(());
            }
            bucket = alternate;
        }

        // Undo the displacement chain so no stored key is lost.
        for (b, i) in swaps.into_iter().rev() {
            std::mem::swap(&mut carried, &mut self.buckets[b][i]);
        }
        debug_assert_eq!(carried.key, key);

        Err(Error::IndexCapacity {
            key,
            capacity: self.capacity,
        })
    }
}

impl AddressStore for CuckooAddressStore {
    fn initialize(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "address store capacity must be positive".to_string(),
            ));
        }
        let bucket_count = capacity.div_ceil(SLOTS_PER_BUCKET).next_power_of_two();
        self.buckets = (0..bucket_count)
            .map(|_| Vec::with_capacity(SLOTS_PER_BUCKET))
            .collect();
        self.capacity = capacity;
        self.len = 0;
        self.rng = StdRng::seed_from_u64(VICTIM_SEED);
        debug!(capacity, bucket_count, "cuckoo store initialized");
        Ok(())
    }

    fn set(&mut self, key: &str, values: Vec<PairId>) -> Result<()> {
        if self.buckets.is_empty() {
            return Err(Error::IndexNotInitialized);
        }
        if let Some((b, i)) = self.find(key) {
            self.buckets[b][i].values = values;
            return Ok(());
        }
        if self.len >= self.capacity {
            return Err(Error::IndexCapacity {
                key: key.to_string(),
                capacity: self.capacity,
            });
        }
        self.insert_new(Slot {
            key: key.to_string(),
            values,
        })
    }

    fn get(&self, key: &str) -> Option<Vec<PairId>> {
        if self.buckets.is_empty() {
            return None;
        }
        self.find(key)
            .map(|(b, i)| self.buckets[b][i].values.clone())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_initialized(&self) -> bool {
        !self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_before_initialize_fails() {
        let mut store = CuckooAddressStore::new();
        assert!(matches!(
            store.set("paris", vec![1]),
            Err(Error::IndexNotInitialized)
        ));
        assert!(store.get("paris").is_none());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(CuckooAddressStore::with_capacity(0).is_err());
    }

    #[test]
    fn bucket_count_is_power_of_two() {
        let store = CuckooAddressStore::with_capacity(37).unwrap();
        assert_eq!(store.bucket_count(), 16);
        let small = CuckooAddressStore::with_capacity(1).unwrap();
        assert_eq!(small.bucket_count(), 1);
    }

    #[test]
    fn set_get_and_overwrite() {
        let mut store = CuckooAddressStore::with_capacity(16).unwrap();
        store.set("paris", vec![3, 7]).unwrap();
        assert_eq!(store.get("paris"), Some(vec![3, 7]));

        store.set("paris", vec![9]).unwrap();
        assert_eq!(store.get("paris"), Some(vec![9]));
        assert_eq!(store.len(), 1);
        assert!(store.get("france").is_none());
    }

    #[test]
    fn fills_to_capacity_without_losing_keys() {
        let capacity = 64;
        let mut store = CuckooAddressStore::with_capacity(capacity).unwrap();
        let mut stored = Vec::new();
        for i in 0..capacity {
            let key = format!("entity-{}", i);
            match store.set(&key, vec![i as PairId]) {
                Ok(()) => stored.push((key, i as PairId)),
                Err(Error::IndexCapacity { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(store.len(), stored.len());
        for (key, value) in &stored {
            assert_eq!(store.get(key), Some(vec![*value]), "lost {}", key);
        }
    }

    #[test]
    fn overflow_is_reported_and_keeps_existing_entries() {
        let mut store = CuckooAddressStore::with_capacity(8).unwrap();
        let mut stored = Vec::new();
        let mut overflowed = false;
        for i in 0..20u64 {
            let key = format!("k{}", i);
            match store.set(&key, vec![i]) {
                Ok(()) => stored.push((key, i)),
                Err(Error::IndexCapacity { capacity, .. }) => {
                    assert_eq!(capacity, 8);
                    overflowed = true;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert!(overflowed);
        assert!(store.len() <= 8);
        for (key, value) in &stored {
            assert_eq!(store.get(key), Some(vec![*value]));
        }
    }

    #[test]
    fn overwrite_at_capacity_still_succeeds() {
        let mut store = CuckooAddressStore::with_capacity(1).unwrap();
        store.set("only", vec![1]).unwrap();
        assert!(store.set("other", vec![2]).is_err());
        store.set("only", vec![5]).unwrap();
        assert_eq!(store.get("only"), Some(vec![5]));
    }

    #[test]
    fn initialize_resets_contents() {
        let mut store = CuckooAddressStore::with_capacity(8).unwrap();
        store.set("a", vec![1]).unwrap();
        store.initialize(8).unwrap();
        assert!(store.is_empty());
        assert!(store.get("a").is_none());
    }
}
