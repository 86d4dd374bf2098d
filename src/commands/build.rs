//! `build`: corpus → Abstracts → forest → entity index → snapshot.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::config::ForestConfig;
use crate::corpus::{ChunkStore, InMemoryCorpus};
use crate::forest::{
    build_abstract_records, build_forest, AbstractSummarizer, ForestOptions, ForestStats,
    HierarchyOracle, LlmHierarchyOracle, LlmSummarizer,
};
use crate::index::{index_forest, EntityAbstractIndex};
use crate::integrations::OpenAIClient;
use crate::retrieval::load_vocabulary;
use crate::snapshot::ForestSnapshot;

/// Build configuration
#[derive(Debug, Clone)]
pub struct BuildArgs {
    /// JSONL file or directory of `.txt` files
    pub chunks: PathBuf,
    /// Entity vocabulary (`.txt` or `.csv`)
    pub entities: PathBuf,
    pub snapshot: PathBuf,
    /// Defaults to the corpus fingerprint
    pub corpus_version: Option<String>,
    /// Skip every LLM call
    pub offline: bool,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub build_id: Uuid,
    pub stats: ForestStats,
    pub entities: usize,
    pub mapped_entities: usize,
    pub snapshot: PathBuf,
}

/// Summarizer for the current credentials: chat model when online,
/// concatenation otherwise.
pub fn summarizer_for(config: &ForestConfig) -> AbstractSummarizer {
    if !config.llm.has_credentials() {
        return AbstractSummarizer::concat(config.abstract_char_budget);
    }
    match OpenAIClient::from_config(&config.llm) {
        Ok(client) => AbstractSummarizer::Llm(LlmSummarizer::new(
            client,
            config.llm.model.clone(),
            config.abstract_char_budget,
        )),
        Err(_) => AbstractSummarizer::concat(config.abstract_char_budget),
    }
}

/// Build a snapshot and its live index from an already loaded corpus.
pub async fn build_from_corpus<O: HierarchyOracle>(
    corpus: &InMemoryCorpus,
    entities: &[String],
    source_table: &str,
    corpus_version: &str,
    config: &ForestConfig,
    oracle: &O,
    summarizer: &AbstractSummarizer,
) -> Result<(ForestSnapshot, EntityAbstractIndex)> {
    let records = build_abstract_records(corpus.chunks(), config.group_size, summarizer)
        .await
        .context("Failed to build Abstracts")?;

    let mut forest = build_forest(records, oracle, &ForestOptions::from(config))
        .await
        .context("Failed to build forest")?;

    let (index, entity_map) = index_forest(
        entities,
        corpus.chunks(),
        config.group_size,
        &mut forest,
        config.capacity_margin,
    )
    .context("Failed to populate entity index")?;

    let snapshot = ForestSnapshot::new(
        source_table,
        corpus_version,
        entities.len(),
        config.group_size,
        forest,
        entity_map,
    );
    Ok((snapshot, index))
}

pub async fn run(args: &BuildArgs, config: &ForestConfig) -> Result<BuildReport> {
    let config = if args.offline {
        config.clone().offline()
    } else {
        config.clone()
    };

    let corpus = InMemoryCorpus::load(&args.chunks, config.group_size)
        .with_context(|| format!("Failed to load chunks from {}", args.chunks.display()))?;
    let entities = load_vocabulary(&args.entities)
        .with_context(|| format!("Failed to load entities from {}", args.entities.display()))?;
    let corpus_version = args
        .corpus_version
        .clone()
        .unwrap_or_else(|| corpus.fingerprint());

    info!(
        "Building forest over {} chunks and {} entities (corpus {})",
        corpus.len(),
        entities.len(),
        corpus_version
    );

    let oracle = LlmHierarchyOracle::from_config(&config.llm);
    if !oracle.is_online() {
        info!("No LLM credentials, every tree uses the fallback hierarchy");
    }
    let summarizer = summarizer_for(&config);

    let source_table = args.chunks.display().to_string();
    let (snapshot, _index) = build_from_corpus(
        &corpus,
        &entities,
        &source_table,
        &corpus_version,
        &config,
        &oracle,
        &summarizer,
    )
    .await?;

    snapshot
        .save(&args.snapshot)
        .with_context(|| format!("Failed to save snapshot to {}", args.snapshot.display()))?;

    Ok(BuildReport {
        build_id: snapshot.build_id,
        stats: snapshot.forest.stats(),
        entities: entities.len(),
        mapped_entities: snapshot.entity_map.len(),
        snapshot: args.snapshot.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn offline_build_writes_snapshot() {
        let dir = tempdir().unwrap();
        let chunks = dir.path().join("chunks.jsonl");
        fs::write(
            &chunks,
            "{\"id\":0,\"content\":\"Paris is a city\"}\n\
             {\"id\":1,\"content\":\"France is a country\"}\n\
             {\"id\":2,\"content\":\"Berlin is in Germany\"}\n",
        )
        .unwrap();
        let entities = dir.path().join("entities.txt");
        fs::write(&entities, "Paris\nFrance\nGermany\nTokyo\n").unwrap();

        let args = BuildArgs {
            chunks,
            entities,
            snapshot: dir.path().join("forest.json"),
            corpus_version: Some("v1".into()),
            offline: true,
        };
        let report = run(&args, &ForestConfig::defaults()).await.unwrap();
        assert_eq!(report.stats.nodes, 2);
        assert_eq!(report.entities, 4);
        assert_eq!(report.mapped_entities, 3);

        let snapshot = ForestSnapshot::load(&args.snapshot).unwrap();
        assert!(!snapshot.is_stale(4, "v1"));
        assert_eq!(snapshot.entity_map["germany"], vec![1]);

        let corpus = InMemoryCorpus::load(&args.chunks, 2).unwrap();
        assert_eq!(corpus.len(), 3);
    }
}
