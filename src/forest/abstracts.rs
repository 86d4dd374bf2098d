//! Grouping raw chunks into Abstracts.
//!
//! `pair_id = chunk_id / group_size`; consecutive chunks sharing a pair id
//! form one Abstract whose content comes from an [`AbstractSummarizer`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::node::{AbstractRecord, ChunkId, PairId};
use crate::config::DEFAULT_ABSTRACT_CHAR_BUDGET;
use crate::corpus::Chunk;
use crate::integrations::{ChatMessage, OpenAIClient};
use crate::prompts::{render, Prompt};
use crate::{Error, Result};

static SUMMARY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Group(\d+):\s*(.+)$").expect("valid summary regex"));

/// Chunks that will become one Abstract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGroup {
    pub pair_id: PairId,
    pub chunk_ids: Vec<ChunkId>,
    pub texts: Vec<String>,
    pub group_key: Option<String>,
}

impl ChunkGroup {
    /// Texts joined by a blank line.
    pub fn joined(&self) -> String {
        self.texts.join("\n\n")
    }
}

/// Offline summarizer: concatenated chunk text, capped in characters.
#[derive(Debug, Clone)]
pub struct ConcatSummarizer {
    pub char_budget: usize,
}

impl Default for ConcatSummarizer {
    fn default() -> Self {
        Self {
            char_budget: DEFAULT_ABSTRACT_CHAR_BUDGET,
        }
    }
}

impl ConcatSummarizer {
    pub fn summarize(&self, group: &ChunkGroup) -> String {
        let joined = group.joined();
        if joined.chars().count() > self.char_budget {
            joined.chars().take(self.char_budget).collect()
        } else {
            joined
        }
    }
}

/// Chat-model summarizer. Groups are sent in batches; any group the model
/// skips or any batch that fails is summarized by concatenation instead.
#[derive(Debug, Clone)]
pub struct LlmSummarizer {
    client: OpenAIClient,
    model: String,
    batch_size: usize,
    fallback: ConcatSummarizer,
}

impl LlmSummarizer {
    pub fn new(client: OpenAIClient, model: impl Into<String>, char_budget: usize) -> Self {
        Self {
            client,
            model: model.into(),
            batch_size: 10,
            fallback: ConcatSummarizer { char_budget },
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn summarize_batch(&self, groups: &[ChunkGroup]) -> Vec<String> {
        let listing = groups
            .iter()
            .map(|g| format!("Group{}:\n{}", g.pair_id, self.fallback.summarize(g)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = render(&Prompt::AbstractSummary.load_or_builtin(), &[("groups", &listing)]);

        let parsed: BTreeMap<PairId, String> = match self
            .client
            .chat_completion(vec![ChatMessage::user(prompt)], &self.model, 0.0, 4000)
            .await
        {
            Ok(text) => parse_summaries(&text),
            Err(err) => {
                warn!("Summary batch of {} groups failed: {}", groups.len(), err);
                BTreeMap::new()
            }
        };

        groups
            .iter()
            .map(|g| match parsed.get(&g.pair_id) {
                Some(summary) => summary.clone(),
                None => {
                    debug!("Group{} not summarized by model, concatenating", g.pair_id);
                    self.fallback.summarize(g)
                }
            })
            .collect()
    }
}

fn parse_summaries(text: &str) -> BTreeMap<PairId, String> {
    text.lines()
        .filter_map(|line| {
            let caps = SUMMARY_LINE.captures(line.trim())?;
            let id = caps.get(1)?.as_str().parse().ok()?;
            let summary = caps.get(2)?.as_str().trim().to_string();
            Some((id, summary))
        })
        .filter(|(_, summary)| !summary.is_empty())
        .collect()
}

/// Produces Abstract content for chunk groups.
#[allow(clippy::large_enum_variant)]
pub enum AbstractSummarizer {
    Concat(ConcatSummarizer),
    Llm(LlmSummarizer),
}

impl AbstractSummarizer {
    pub fn concat(char_budget: usize) -> Self {
        AbstractSummarizer::Concat(ConcatSummarizer { char_budget })
    }

    /// One summary per group, in input order.
    pub async fn summarize(&self, groups: &[ChunkGroup]) -> Vec<String> {
        match self {
            AbstractSummarizer::Concat(concat) => groups.iter().map(|g| concat.summarize(g)).collect(),
            AbstractSummarizer::Llm(llm) => {
                let mut out = Vec::with_capacity(groups.len());
                for batch in groups.chunks(llm.batch_size) {
                    out.extend(llm.summarize_batch(batch).await);
                }
                out
            }
        }
    }
}

/// Group chunks by `chunk_id / group_size` in ascending id order.
/// The group takes the first chunk's `group_key`.
pub fn group_chunks<'a>(
    chunks: impl IntoIterator<Item = &'a Chunk>,
    group_size: usize,
) -> Result<Vec<ChunkGroup>> {
    if group_size == 0 {
        return Err(Error::InvalidArgument("group_size must be >= 1".to_string()));
    }

    let mut sorted: Vec<&Chunk> = chunks.into_iter().collect();
    sorted.sort_by_key(|c| c.id);

    let mut groups: Vec<ChunkGroup> = Vec::new();
    for chunk in sorted {
        let pair_id = chunk.id / group_size as u64;
        match groups.last_mut() {
            Some(group) if group.pair_id == pair_id => {
                group.chunk_ids.push(chunk.id);
                group.texts.push(chunk.content.clone());
            }
            _ => groups.push(ChunkGroup {
                pair_id,
                chunk_ids: vec![chunk.id],
                texts: vec![chunk.content.clone()],
                group_key: chunk.group_key.clone(),
            }),
        }
    }
    Ok(groups)
}

/// Build one [`AbstractRecord`] per chunk group.
pub async fn build_abstract_records<'a>(
    chunks: impl IntoIterator<Item = &'a Chunk>,
    group_size: usize,
    summarizer: &AbstractSummarizer,
) -> Result<Vec<AbstractRecord>> {
    let groups = group_chunks(chunks, group_size)?;
    let summaries = summarizer.summarize(&groups).await;

    let records: Vec<AbstractRecord> = groups
        .into_iter()
        .zip(summaries)
        .map(|(group, content)| AbstractRecord {
            pair_id: group.pair_id,
            content,
            chunk_ids: group.chunk_ids,
            group_key: group.group_key,
        })
        .collect();

    info!("Built {} Abstracts (group size {})", records.len(), group_size);
    Ok(records)
}
