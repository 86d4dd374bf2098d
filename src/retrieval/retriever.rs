//! Query-time hierarchical retrieval.
//!
//! Recognized entities are looked up in the [`EntityAbstractIndex`], each
//! address is resolved through the [`AbstractForest`], and the Abstract plus
//! its chunk text (and optionally the direct parent) becomes one
//! [`ContextBlock`]. Blocks are ranked against the query embedding,
//! near-duplicates are dropped, and the result is cut to the token budget.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::budget::{estimate_tokens, truncate_to_tokens};
use crate::analysis::{cosine_similarity, EmbedBackend};
use crate::config::ForestConfig;
use crate::corpus::ChunkStore;
use crate::forest::{AbstractForest, AbstractNode, PairId};
use crate::index::EntityAbstractIndex;
use crate::metrics;
use crate::{Error, Result};

pub const BLOCK_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    #[default]
    Baseline,
    EntityIndexed,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Baseline => "baseline",
            RetrievalMode::EntityIndexed => "entity_indexed",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Ok(RetrievalMode::Baseline),
            "entity" | "entity_indexed" | "entity-indexed" => Ok(RetrievalMode::EntityIndexed),
            other => Err(Error::InvalidArgument(format!(
                "unknown retrieval mode '{}'",
                other
            ))),
        }
    }
}

/// One level up from a directly indexed Abstract.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentSection {
    pub pair_id: PairId,
    pub content: String,
    pub chunk_text: Vec<String>,
}

/// Context for one (entity, address) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub entity: String,
    pub pair_id: PairId,
    pub content: String,
    pub chunk_text: Vec<String>,
    pub parent: Option<ParentSection>,
}

impl ContextBlock {
    pub fn render(&self) -> String {
        let mut parts = vec![
            format!("[Entity: {}]", self.entity),
            format!("Abstract (pair_id={}): {}", self.pair_id, self.content),
        ];
        if !self.chunk_text.is_empty() {
            parts.push(format!("Original Text:\n{}", self.chunk_text.join(BLOCK_SEPARATOR)));
        }
        if let Some(parent) = &self.parent {
            parts.push(format!("[Parent Abstract (pair_id={})]", parent.pair_id));
            parts.push(format!("Abstract: {}", parent.content));
            if !parent.chunk_text.is_empty() {
                parts.push(format!(
                    "Original Text:\n{}",
                    parent.chunk_text.join(BLOCK_SEPARATOR)
                ));
            }
        }
        parts.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverOptions {
    pub top_k: usize,
    pub max_hierarchy_depth: usize,
    pub dedup_threshold: f32,
    pub section_token_budget: usize,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self::from(&ForestConfig::defaults())
    }
}

impl From<&ForestConfig> for RetrieverOptions {
    fn from(config: &ForestConfig) -> Self {
        Self {
            top_k: config.top_k,
            max_hierarchy_depth: config.max_hierarchy_depth,
            dedup_threshold: config.dedup_threshold,
            section_token_budget: config.section_token_budget(),
        }
    }
}

impl RetrieverOptions {
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.max_hierarchy_depth = depth;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    /// Depth clamped to 1..=2.
    pub fn depth(&self) -> usize {
        self.max_hierarchy_depth.clamp(1, 2)
    }
}

/// Assembled hierarchical context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchicalContext {
    pub blocks: Vec<ContextBlock>,
    pub text: String,
    pub truncated: bool,
}

impl HierarchicalContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn token_estimate(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

pub struct HierarchicalRetriever {
    forest: Arc<AbstractForest>,
    index: Arc<EntityAbstractIndex>,
    chunks: Arc<dyn ChunkStore>,
    embedder: Arc<EmbedBackend>,
    options: RetrieverOptions,
}

impl HierarchicalRetriever {
    pub fn new(
        forest: Arc<AbstractForest>,
        index: Arc<EntityAbstractIndex>,
        chunks: Arc<dyn ChunkStore>,
        embedder: Arc<EmbedBackend>,
        options: RetrieverOptions,
    ) -> Self {
        Self {
            forest,
            index,
            chunks,
            embedder,
            options,
        }
    }

    pub fn options(&self) -> &RetrieverOptions {
        &self.options
    }

    fn chunk_text(&self, node: &AbstractNode) -> Vec<String> {
        node.chunk_ids
            .iter()
            .filter_map(|&id| {
                let text = self.chunks.get_chunk(id);
                if text.is_none() {
                    debug!("Chunk {} missing from store", id);
                }
                text
            })
            .collect()
    }

    /// One block per (entity, address) for the first `top_k` addresses of
    /// each entity. An unusable index yields no blocks.
    pub fn collect_blocks(&self, entities: &[String]) -> Vec<ContextBlock> {
        let depth = self.options.depth();
        let mut blocks = Vec::new();

        for entity in entities {
            let addresses = match self.index.get_addresses(entity) {
                Ok(addresses) => addresses,
                Err(err) if err.is_index_unavailable() => {
                    warn!("Entity index unavailable, no hierarchical context: {}", err);
                    return Vec::new();
                }
                Err(err) => {
                    warn!("Lookup for '{}' failed: {}", entity, err);
                    continue;
                }
            };

            for pair_id in addresses.into_iter().take(self.options.top_k) {
                let Some(node) = self.forest.node(pair_id) else {
                    warn!("Stale address {} for '{}', skipping", pair_id, entity);
                    continue;
                };

                let parent = if depth >= 2 {
                    self.forest.parent_of(pair_id).map(|p| ParentSection {
                        pair_id: p.pair_id,
                        content: p.content.clone(),
                        chunk_text: self.chunk_text(p),
                    })
                } else {
                    None
                };

                blocks.push(ContextBlock {
                    entity: entity.clone(),
                    pair_id,
                    content: node.content.clone(),
                    chunk_text: self.chunk_text(node),
                    parent,
                });
            }
        }
        blocks
    }

    /// Full retrieval: collect, rank against `query`, de-duplicate, join and
    /// cut to the section budget.
    pub async fn retrieve(&self, query: &str, entities: &[String]) -> Result<HierarchicalContext> {
        if entities.is_empty() {
            debug!("No entities recognized, skipping hierarchical retrieval");
            return Ok(HierarchicalContext::default());
        }

        let blocks = self.collect_blocks(entities);
        if blocks.is_empty() {
            return Ok(HierarchicalContext::default());
        }

        let rendered: Vec<String> = blocks.iter().map(ContextBlock::render).collect();
        let query_embedding = self.embedder.embed_one(query).await?;
        let block_embeddings = self.embedder.embed(&rendered).await?;

        let order = rank_and_dedup(
            &query_embedding,
            &block_embeddings,
            self.options.dedup_threshold,
        );
        info!(
            "Kept {} of {} context blocks for {} entities",
            order.len(),
            blocks.len(),
            entities.len()
        );
        metrics::record_context_blocks(order.len());

        let joined = order
            .iter()
            .map(|&i| rendered[i].as_str())
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR);
        let text = truncate_to_tokens(&joined, self.options.section_token_budget).to_string();
        let truncated = text.len() < joined.len();
        if truncated {
            debug!(
                "Hierarchical context cut to {} tokens",
                self.options.section_token_budget
            );
        }

        let mut slots: Vec<Option<ContextBlock>> = blocks.into_iter().map(Some).collect();
        let kept = order.iter().filter_map(|&i| slots[i].take()).collect();

        Ok(HierarchicalContext {
            blocks: kept,
            text,
            truncated,
        })
    }
}

/// Indices of blocks to keep, by descending similarity to the query. A block
/// more similar than `threshold` to an already kept block is dropped.
pub fn rank_and_dedup(query: &[f32], blocks: &[Vec<f32>], threshold: f32) -> Vec<usize> {
    let mut ranked: Vec<(usize, f32)> = blocks
        .iter()
        .enumerate()
        .map(|(i, embedding)| (i, cosine_similarity(query, embedding)))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let mut kept: Vec<usize> = Vec::new();
    for (i, _) in ranked {
        let duplicate = kept
            .iter()
            .any(|&k| cosine_similarity(&blocks[k], &blocks[i]) > threshold);
        if duplicate {
            debug!("Dropping near-duplicate block {}", i);
        } else {
            kept.push(i);
        }
    }
    kept
}
