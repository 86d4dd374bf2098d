//! Entity → Abstract address index and the mapping scan that fills it.

pub mod cuckoo;
pub mod entity_index;
pub mod mapping;
pub mod normalize;

pub use cuckoo::{AddressStore, CuckooAddressStore};
pub use entity_index::EntityAbstractIndex;
pub use mapping::{build_entity_mapping, index_forest, populate_index};
pub use normalize::normalize_entity;
