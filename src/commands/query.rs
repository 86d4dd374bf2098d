//! `query`: recognize entities, gather context and assemble the prompt.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::build::{build_from_corpus, summarizer_for};
use crate::analysis::{EmbedBackend, InMemoryVectorIndex, VectorIndex};
use crate::config::ForestConfig;
use crate::corpus::InMemoryCorpus;
use crate::forest::{AbstractForest, LlmHierarchyOracle};
use crate::index::EntityAbstractIndex;
use crate::integrations::OpenAIClient;
use crate::retrieval::{
    direct_chunks, load_vocabulary, AugmentedPrompt, EntityRecognizer, HierarchicalContext,
    HierarchicalRetriever, RetrievalMode, RetrieverOptions, VocabularyRecognizer,
};
use crate::session::RetrievalSession;
use crate::snapshot::ForestSnapshot;

#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub chunks: PathBuf,
    pub entities: PathBuf,
    pub snapshot: PathBuf,
    pub query: String,
    pub depth: Option<usize>,
    pub k: Option<usize>,
    pub mode: RetrievalMode,
    /// Expected snapshot corpus version; defaults to the corpus fingerprint
    pub corpus_version: Option<String>,
    /// Send the prompt to the chat model
    pub answer: bool,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub session: RetrievalSession,
    pub entities: Vec<String>,
    pub context: HierarchicalContext,
    pub prompt: AugmentedPrompt,
    pub answer: Option<String>,
}

/// Loaded forest and index for EntityIndexed retrieval.
struct Prepared {
    forest: AbstractForest,
    index: EntityAbstractIndex,
    source_table: String,
    entity_count: usize,
}

/// Load the snapshot, rebuilding and re-saving it when missing or stale.
async fn prepare(
    args: &QueryArgs,
    corpus: &InMemoryCorpus,
    vocabulary: &[String],
    config: &ForestConfig,
) -> Result<Prepared> {
    let corpus_version = args
        .corpus_version
        .clone()
        .unwrap_or_else(|| corpus.fingerprint());

    match ForestSnapshot::load(&args.snapshot) {
        Ok(snapshot) => match snapshot.ensure_fresh(vocabulary.len(), &corpus_version) {
            Ok(()) if snapshot.group_size == config.group_size => {
                let index = snapshot
                    .restore_index(config.capacity_margin)
                    .context("Failed to restore entity index")?;
                return Ok(Prepared {
                    source_table: snapshot.source_table,
                    entity_count: snapshot.entity_count,
                    forest: snapshot.forest,
                    index,
                });
            }
            Ok(()) => warn!(
                "Snapshot group size {} differs from configured {}, rebuilding",
                snapshot.group_size, config.group_size
            ),
            Err(err) => warn!("{}, rebuilding", err),
        },
        Err(err) => warn!("No usable snapshot at {}: {}", args.snapshot.display(), err),
    }

    let oracle = LlmHierarchyOracle::from_config(&config.llm);
    let summarizer = summarizer_for(config);
    let source_table = args.chunks.display().to_string();
    let (snapshot, index) = build_from_corpus(
        corpus,
        vocabulary,
        &source_table,
        &corpus_version,
        config,
        &oracle,
        &summarizer,
    )
    .await?;
    if let Err(err) = snapshot.save(&args.snapshot) {
        warn!("Could not persist rebuilt snapshot: {}", err);
    }

    Ok(Prepared {
        source_table,
        entity_count: snapshot.entity_count,
        forest: snapshot.forest,
        index,
    })
}

pub async fn run(args: &QueryArgs, config: &ForestConfig) -> Result<QueryOutcome> {
    let corpus = InMemoryCorpus::load(&args.chunks, config.group_size)
        .with_context(|| format!("Failed to load chunks from {}", args.chunks.display()))?;
    let vocabulary = load_vocabulary(&args.entities)
        .with_context(|| format!("Failed to load entities from {}", args.entities.display()))?;

    let mut options = RetrieverOptions::from(config);
    if let Some(depth) = args.depth {
        options = options.with_depth(depth);
    }
    if let Some(k) = args.k {
        options = options.with_top_k(k);
    }
    let section_budget = options.section_token_budget;

    let prepared = if args.mode == RetrievalMode::EntityIndexed {
        match prepare(args, &corpus, &vocabulary, config).await {
            Ok(prepared) => Some(prepared),
            Err(err) => {
                warn!("Entity index unavailable: {:#}", err);
                None
            }
        }
    } else {
        None
    };

    let mut session = match &prepared {
        Some(p) => RetrievalSession::new(p.source_table.clone(), p.entity_count, args.mode),
        None => RetrievalSession::new(
            args.chunks.display().to_string(),
            vocabulary.len(),
            args.mode,
        ),
    };
    if prepared.is_none() {
        session.degrade("no forest or entity index");
    }

    let recognizer = VocabularyRecognizer::new(&vocabulary);
    let entities = recognizer.recognize(&args.query);
    session.record_query(entities.len());
    info!("Recognized {} entities: {:?}", entities.len(), entities);

    let embedder = Arc::new(if config.llm.has_credentials() {
        EmbedBackend::from_env(config.embedding_dim)
    } else {
        EmbedBackend::local(config.embedding_dim)
    });
    let corpus = Arc::new(corpus);

    let (forest, context) = match prepared {
        Some(p) => {
            let forest = Arc::new(p.forest);
            let retriever = HierarchicalRetriever::new(
                forest.clone(),
                Arc::new(p.index),
                corpus.clone(),
                embedder.clone(),
                options.clone(),
            );
            let context = retriever.retrieve(&args.query, &entities).await?;
            (Some(forest), context)
        }
        None => (None, HierarchicalContext::default()),
    };
    if context.is_empty() {
        session.degrade("no hierarchical context for this query");
    }

    let empty = AbstractForest::default();
    let forest_ref = forest.as_deref().unwrap_or(&empty);
    let direct = direct_search_or_local(
        &corpus,
        forest_ref,
        &embedder,
        &args.query,
        options.top_k,
        config.embedding_dim,
    )
    .await?;

    let prompt = AugmentedPrompt::build(&args.query, &direct, Some(&context), section_budget);

    let answer = if args.answer {
        let client = OpenAIClient::from_config(&config.llm).context("Chat model not configured")?;
        Some(
            client
                .answer(&prompt.render(), &config.llm.model)
                .await
                .context("Failed to get answer")?,
        )
    } else {
        None
    };

    Ok(QueryOutcome {
        session,
        entities,
        context,
        prompt,
        answer,
    })
}

/// Top `k` raw chunks for the query by cosine similarity.
async fn direct_search(
    corpus: &InMemoryCorpus,
    forest: &AbstractForest,
    embedder: &EmbedBackend,
    query: &str,
    k: usize,
) -> Result<Vec<String>> {
    let vector_index = InMemoryVectorIndex::from_corpus_and_forest(corpus, forest, embedder).await?;
    let query_embedding = embedder.embed_one(query).await?;
    let hits = vector_index.search_chunks(&query_embedding, k);
    let direct = direct_chunks(&hits);
    info!(
        "Baseline search over {} records returned {} chunks",
        vector_index.len(),
        direct.len()
    );
    Ok(direct)
}

/// Direct search that retries with local embeddings when the remote
/// embedder fails.
async fn direct_search_or_local(
    corpus: &InMemoryCorpus,
    forest: &AbstractForest,
    embedder: &EmbedBackend,
    query: &str,
    k: usize,
    local_dim: usize,
) -> Result<Vec<String>> {
    match direct_search(corpus, forest, embedder, query, k).await {
        Ok(direct) => Ok(direct),
        Err(err) if !embedder.is_local() => {
            warn!("Direct search failed, retrying with local embeddings: {:#}", err);
            direct_search(corpus, forest, &EmbedBackend::local(local_dim), query, k).await
        }
        Err(err) => Err(err),
    }
}
