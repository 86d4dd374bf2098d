//! Entity → Abstract address index.

use std::collections::HashSet;
use tracing::{debug, info};

use super::cuckoo::{AddressStore, CuckooAddressStore};
use super::normalize::normalize_entity;
use crate::forest::PairId;
use crate::metrics;
use crate::{Error, Result};

pub const MIN_CAPACITY: usize = 8;

/// Maps normalized entity names to the `pair_id`s of the Abstracts that
/// mention them. Writes and reads go through [`normalize_entity`].
pub struct EntityAbstractIndex {
    store: Box<dyn AddressStore>,
}

impl Default for EntityAbstractIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityAbstractIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityAbstractIndex")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl EntityAbstractIndex {
    /// Uninitialized index over a [`CuckooAddressStore`].
    pub fn new() -> Self {
        Self::with_store(Box::new(CuckooAddressStore::new()))
    }

    pub fn with_store(store: Box<dyn AddressStore>) -> Self {
        Self { store }
    }

    /// Initialized index sized for `expected` entities; `margin` is clamped to at least 2.
    pub fn with_expected_entities(expected: usize, margin: usize) -> Result<Self> {
        let margin = margin.max(2);
        let mut index = Self::new();
        index.initialize(expected.saturating_mul(margin))?;
        Ok(index)
    }

    /// Must be called before any write. Capacity is at least [`MIN_CAPACITY`].
    pub fn initialize(&mut self, capacity_hint: usize) -> Result<()> {
        let capacity = capacity_hint.max(MIN_CAPACITY);
        self.store.initialize(capacity)?;
        info!("Entity index initialized with capacity {}", capacity);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_initialized()
    }

    /// Overwrite the address list for `entity`. Duplicates are dropped,
    /// keeping first occurrence.
    pub fn set_addresses(&mut self, entity: &str, pair_ids: &[PairId]) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::IndexNotInitialized);
        }
        let key = normalize_entity(entity);
        if key.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "entity '{}' is empty after normalization",
                entity
            )));
        }

        let mut seen = HashSet::with_capacity(pair_ids.len());
        let addresses: Vec<PairId> = pair_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        debug!("Index set '{}' -> {:?}", key, addresses);
        self.store.set(&key, addresses)
    }

    /// Addresses for `entity`, empty on miss.
    pub fn get_addresses(&self, entity: &str) -> Result<Vec<PairId>> {
        if !self.is_initialized() {
            return Err(Error::IndexNotInitialized);
        }
        let key = normalize_entity(entity);
        let found = if key.is_empty() { None } else { self.store.get(&key) };
        metrics::record_index_lookup(found.is_some());
        Ok(found.unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub fn load_factor(&self) -> f64 {
        match self.capacity() {
            0 => 0.0,
            capacity => self.len() as f64 / capacity as f64,
        }
    }
}
