//! Tests for query command

use abstract_forest::commands::{build_run, query_run, BuildArgs, QueryArgs};
use abstract_forest::{ForestConfig, RetrievalMode};
use tempfile::tempdir;

use super::write_inputs;

fn query_args(dir: &std::path::Path, query: &str) -> QueryArgs {
    let (chunks, entities) = write_inputs(dir);
    QueryArgs {
        chunks,
        entities,
        snapshot: dir.join("forest.json"),
        query: query.to_string(),
        depth: Some(1),
        k: None,
        mode: RetrievalMode::EntityIndexed,
        corpus_version: Some("v1".to_string()),
        answer: false,
    }
}

#[tokio::test]
async fn test_query_uses_existing_snapshot() {
    let dir = tempdir().unwrap();
    let args = query_args(dir.path(), "What river runs through Paris?");
    let config = ForestConfig::defaults().offline();

    build_run(
        &BuildArgs {
            chunks: args.chunks.clone(),
            entities: args.entities.clone(),
            snapshot: args.snapshot.clone(),
            corpus_version: Some("v1".to_string()),
            offline: true,
        },
        &config,
    )
    .await
    .unwrap();
    let before = std::fs::read_to_string(&args.snapshot).unwrap();

    let outcome = query_run(&args, &config).await.unwrap();
    assert_eq!(outcome.entities, vec!["paris"]);
    assert_eq!(outcome.session.mode(), RetrievalMode::EntityIndexed);
    assert_eq!(outcome.context.blocks.len(), 1);
    assert_eq!(outcome.context.blocks[0].pair_id, 1);
    assert!(outcome.prompt.render().ends_with("Question: \nWhat river runs through Paris?"));

    let after = std::fs::read_to_string(&args.snapshot).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_query_without_entities_degrades_to_baseline() {
    let dir = tempdir().unwrap();
    let args = query_args(dir.path(), "What is a continent?");
    let config = ForestConfig::defaults().offline();

    let outcome = query_run(&args, &config).await.unwrap();
    assert!(outcome.entities.is_empty());
    assert!(outcome.context.is_empty());
    assert_eq!(outcome.session.mode(), RetrievalMode::Baseline);
    assert!(!outcome.prompt.render().contains("Abstracts:"));
}

#[tokio::test]
async fn test_query_rebuilds_stale_snapshot() {
    let dir = tempdir().unwrap();
    let mut args = query_args(dir.path(), "Tell me about France");
    let config = ForestConfig::defaults().offline();

    query_run(&args, &config).await.unwrap();
    args.corpus_version = Some("v2".to_string());
    let outcome = query_run(&args, &config).await.unwrap();

    assert_eq!(outcome.session.mode(), RetrievalMode::EntityIndexed);
    let snapshot = abstract_forest::ForestSnapshot::load(&args.snapshot).unwrap();
    assert_eq!(snapshot.corpus_version, "v2");
}
