//! Abstract records and the tree nodes built from them

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Stable identity of an Abstract: `chunk_id / group_size`.
pub type PairId = u64;

/// Identity of a raw chunk in the corpus.
pub type ChunkId = u64;

/// Flat Abstract produced by grouping chunks, before any hierarchy exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractRecord {
    pub pair_id: PairId,
    pub content: String,
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
}

impl AbstractRecord {
    pub fn new(pair_id: PairId, content: impl Into<String>, chunk_ids: Vec<ChunkId>) -> Self {
        Self {
            pair_id,
            content: content.into(),
            chunk_ids,
            group_key: None,
        }
    }

    pub fn with_group_key(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }
}

/// A node of an [`AbstractTree`](super::AbstractTree).
///
/// Parent and children are `pair_id`s into the owning tree's node map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractNode {
    pub pair_id: PairId,
    pub content: String,
    #[serde(deserialize_with = "crate::snapshot::deserialize_chunk_ids")]
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub parent: Option<PairId>,
    #[serde(default)]
    pub children: Vec<PairId>,
    #[serde(default)]
    pub associated_entities: BTreeSet<String>,
}

impl AbstractNode {
    pub fn new(pair_id: PairId, content: impl Into<String>, chunk_ids: Vec<ChunkId>) -> Self {
        Self {
            pair_id,
            content: content.into(),
            chunk_ids,
            parent: None,
            children: Vec::new(),
            associated_entities: BTreeSet::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Record that `entity` (already normalized) mentions this node.
    pub fn add_entity(&mut self, entity: &str) {
        if !self.associated_entities.contains(entity) {
            self.associated_entities.insert(entity.to_string());
        }
    }
}

impl From<&AbstractRecord> for AbstractNode {
    fn from(record: &AbstractRecord) -> Self {
        AbstractNode::new(record.pair_id, record.content.clone(), record.chunk_ids.clone())
    }
}

impl From<AbstractRecord> for AbstractNode {
    fn from(record: AbstractRecord) -> Self {
        AbstractNode::new(record.pair_id, record.content, record.chunk_ids)
    }
}
