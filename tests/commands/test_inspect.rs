//! Tests for inspect command

use abstract_forest::commands::{build_run, inspect_run, BuildArgs, OutputFormat};
use abstract_forest::ForestConfig;
use tempfile::tempdir;

use super::write_inputs;

async fn built_snapshot(dir: &std::path::Path) -> std::path::PathBuf {
    let (chunks, entities) = write_inputs(dir);
    let snapshot = dir.join("forest.json");
    build_run(
        &BuildArgs {
            chunks,
            entities,
            snapshot: snapshot.clone(),
            corpus_version: None,
            offline: true,
        },
        &ForestConfig::defaults(),
    )
    .await
    .unwrap();
    snapshot
}

#[tokio::test]
async fn test_inspect_text_lists_trees() {
    let dir = tempdir().unwrap();
    let snapshot = built_snapshot(dir.path()).await;

    let out = inspect_run(&snapshot, None, OutputFormat::Text).unwrap();
    assert!(out.contains("default"));
    assert!(out.contains("fallback"));
}

#[test]
fn test_inspect_node_as_yaml() {
    let dir = tempdir().unwrap();
    let snapshot = tokio_test::block_on(built_snapshot(dir.path()));

    let out = inspect_run(&snapshot, Some(1), OutputFormat::Yaml).unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
    assert_eq!(value["node"]["ancestors"][0].as_u64(), Some(0));
}

#[test]
fn test_inspect_missing_snapshot_fails() {
    let dir = tempdir().unwrap();
    let result = inspect_run(&dir.path().join("none.json"), None, OutputFormat::Json);
    assert!(result.is_err());
}
