//! Brute-force vector index over raw chunks and Abstracts
//!
//! Backs Baseline retrieval: the query embedding is compared against every
//! stored record with cosine similarity.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::embeddings::{cosine_similarity, EmbedBackend};
use crate::corpus::InMemoryCorpus;
use crate::error::Result;
use crate::forest::{AbstractForest, ChunkId, PairId};

/// A searchable record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchRecord {
    RawChunk {
        chunk_id: ChunkId,
        content: String,
    },
    Abstract {
        pair_id: PairId,
        chunk_ids: Vec<ChunkId>,
        content: String,
    },
}

impl SearchRecord {
    pub fn content(&self) -> &str {
        match self {
            SearchRecord::RawChunk { content, .. } | SearchRecord::Abstract { content, .. } => {
                content
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: SearchRecord,
    pub score: f32,
}

/// Similarity search over precomputed embeddings.
pub trait VectorIndex: Send + Sync {
    /// Top `k` records by descending score.
    fn search(&self, embedding: &[f32], k: usize) -> Vec<SearchHit>;

    /// Top `k` raw chunks. Abstract hits are expanded through their
    /// `chunk_ids`, so they never take a slot from a chunk.
    fn search_chunks(&self, embedding: &[f32], k: usize) -> Vec<SearchHit>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stored record with its embedding.
#[derive(Debug, Clone)]
struct IndexedRecord {
    record: SearchRecord,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    entries: Vec<IndexedRecord>,
    chunk_positions: HashMap<ChunkId, usize>,
}

impl InMemoryVectorIndex {
    /// Embed all records in one batch.
    pub async fn build(records: Vec<SearchRecord>, backend: &EmbedBackend) -> Result<Self> {
        if records.is_empty() {
            return Ok(Self::default());
        }

        let texts: Vec<String> = records.iter().map(|r| r.content().to_string()).collect();
        let embeddings = backend.embed(&texts).await?;

        let entries: Vec<IndexedRecord> = records
            .into_iter()
            .zip(embeddings)
            .map(|(record, embedding)| IndexedRecord { record, embedding })
            .collect();

        let chunk_positions = entries
            .iter()
            .enumerate()
            .filter_map(|(pos, entry)| match entry.record {
                SearchRecord::RawChunk { chunk_id, .. } => Some((chunk_id, pos)),
                SearchRecord::Abstract { .. } => None,
            })
            .collect();

        info!("Vector index holds {} records", entries.len());
        Ok(Self {
            entries,
            chunk_positions,
        })
    }

    /// Index every raw chunk of the corpus and every Abstract of the forest.
    pub async fn from_corpus_and_forest(
        corpus: &InMemoryCorpus,
        forest: &AbstractForest,
        backend: &EmbedBackend,
    ) -> Result<Self> {
        let mut records: Vec<SearchRecord> = corpus
            .chunks()
            .map(|chunk| SearchRecord::RawChunk {
                chunk_id: chunk.id,
                content: chunk.content.clone(),
            })
            .collect();
        records.extend(forest.nodes().map(|node| SearchRecord::Abstract {
            pair_id: node.pair_id,
            chunk_ids: node.chunk_ids.clone(),
            content: node.content.clone(),
        }));
        Self::build(records, backend).await
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn search(&self, embedding: &[f32], k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                record: entry.record.clone(),
                score: cosine_similarity(embedding, &entry.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        debug!("Vector search returned {} hits", hits.len());
        hits
    }

    fn search_chunks(&self, embedding: &[f32], k: usize) -> Vec<SearchHit> {
        let mut seen: HashSet<ChunkId> = HashSet::new();
        let mut chunks: Vec<SearchHit> = Vec::new();

        for hit in self.search(embedding, self.entries.len()) {
            if chunks.len() >= k {
                break;
            }
            match hit.record {
                SearchRecord::RawChunk { chunk_id, .. } => {
                    if seen.insert(chunk_id) {
                        chunks.push(hit);
                    }
                }
                SearchRecord::Abstract { chunk_ids, .. } => {
                    for chunk_id in chunk_ids {
                        let Some(&pos) = self.chunk_positions.get(&chunk_id) else {
                            continue;
                        };
                        if seen.insert(chunk_id) {
                            let entry = &self.entries[pos];
                            chunks.push(SearchHit {
                                record: entry.record.clone(),
                                score: cosine_similarity(embedding, &entry.embedding),
                            });
                        }
                    }
                }
            }
        }

        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        chunks.truncate(k);
        debug!("Chunk search returned {} hits", chunks.len());
        chunks
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
