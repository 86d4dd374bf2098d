//! Tests for build command

use abstract_forest::commands::{build_run, BuildArgs};
use abstract_forest::{ForestConfig, ForestSnapshot};
use tempfile::tempdir;

use super::write_inputs;

fn build_args(dir: &std::path::Path) -> BuildArgs {
    let (chunks, entities) = write_inputs(dir);
    BuildArgs {
        chunks,
        entities,
        snapshot: dir.join("out").join("forest.json"),
        corpus_version: Some("v1".to_string()),
        offline: true,
    }
}

#[tokio::test]
async fn test_build_offline_writes_snapshot() {
    let dir = tempdir().unwrap();
    let args = build_args(dir.path());

    let report = build_run(&args, &ForestConfig::defaults()).await.unwrap();
    assert_eq!(report.stats.trees, 1);
    assert_eq!(report.stats.nodes, 2);
    assert_eq!(report.stats.fallback_trees, 1);
    assert_eq!(report.entities, 2);
    assert_eq!(report.mapped_entities, 2);

    let snapshot = ForestSnapshot::load(&args.snapshot).unwrap();
    assert_eq!(snapshot.build_id, report.build_id);
    assert_eq!(snapshot.corpus_version, "v1");
    assert_eq!(snapshot.entity_map["paris"], vec![1]);
    assert_eq!(snapshot.entity_map["france"], vec![1]);
}

#[tokio::test]
async fn test_build_snapshot_restores_index() {
    let dir = tempdir().unwrap();
    let args = build_args(dir.path());
    build_run(&args, &ForestConfig::defaults()).await.unwrap();

    let snapshot = ForestSnapshot::load(&args.snapshot).unwrap();
    assert!(!snapshot.is_stale(2, "v1"));
    let index = snapshot.restore_index(2).unwrap();
    assert_eq!(index.get_addresses("\"Paris\"").unwrap(), vec![1]);
    assert!(index.get_addresses("Berlin").unwrap().is_empty());
}

#[tokio::test]
async fn test_build_missing_corpus_fails() {
    let dir = tempdir().unwrap();
    let mut args = build_args(dir.path());
    args.chunks = dir.path().join("missing.jsonl");

    assert!(build_run(&args, &ForestConfig::defaults()).await.is_err());
    assert!(!args.snapshot.exists());
}
