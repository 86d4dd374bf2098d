//! Integration tests for the abstract_forest library
//!
//! These tests verify the public API and module interactions.

mod commands;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use abstract_forest::analysis::EmbedBackend;
use abstract_forest::forest::{
    build_tree, fallback_assignments, AbstractForest, AbstractNode, AbstractRecord, AbstractTree,
    ForestOptions, HierarchyOracle, HierarchyStrategy, PairId,
};
use abstract_forest::index::{build_entity_mapping, CuckooAddressStore};
use abstract_forest::retrieval::{HierarchicalRetriever, RetrieverOptions};
use abstract_forest::{
    build_forest, AddressStore, Chunk, EntityAbstractIndex, Error, ForestSnapshot, InMemoryCorpus,
    Result,
};

// ============================================================================
// Helpers
// ============================================================================

/// Oracle returning a fixed response, or failing when none is set.
struct ScriptedOracle(Option<String>);

impl HierarchyOracle for ScriptedOracle {
    async fn assign(&self, _prompt: &str) -> Result<String> {
        self.0
            .clone()
            .ok_or_else(|| Error::Oracle("scripted failure".to_string()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn records(ids: std::ops::Range<u64>) -> Vec<AbstractRecord> {
    ids.map(|id| AbstractRecord::new(id, format!("abstract {}", id), vec![id * 2, id * 2 + 1]))
        .collect()
}

/// Every non-root node has one parent that lists it, the root has none,
/// and walking up from any node reaches the root.
fn assert_well_formed(tree: &AbstractTree) {
    let root = tree.root();
    assert!(tree.get(root).unwrap().parent.is_none());
    for node in tree.nodes() {
        if node.pair_id == root {
            continue;
        }
        let parent = node.parent.expect("non-root node has a parent");
        assert!(tree.children(parent).contains(&node.pair_id));

        let ancestors = tree.ancestors(node.pair_id);
        assert!(!ancestors.contains(&node.pair_id), "cycle at {}", node.pair_id);
        assert_eq!(ancestors.last(), Some(&root));
    }
    assert!(tree.validate().is_ok());
}

fn two_level_forest() -> AbstractForest {
    let nodes = vec![
        AbstractNode::new(0, "Overview of European capitals", vec![0, 1]),
        AbstractNode::new(1, "Paris on the Seine", vec![2, 3]),
    ];
    let tree = AbstractTree::assemble(
        "default",
        nodes,
        0,
        &BTreeMap::from([(1, 0)]),
        HierarchyStrategy::Fallback,
    )
    .unwrap();
    AbstractForest::from_trees(vec![tree]).unwrap()
}

fn two_level_corpus() -> InMemoryCorpus {
    InMemoryCorpus::new(vec![
        Chunk::new(0, "Europe has many capitals."),
        Chunk::new(1, "Rivers cross the continent."),
        Chunk::new(2, "Paris sits on the Seine."),
        Chunk::new(3, "It is the capital of France."),
    ])
    .unwrap()
}

fn retriever(depth: usize) -> HierarchicalRetriever {
    let mut index = EntityAbstractIndex::with_expected_entities(2, 2).unwrap();
    index.set_addresses("paris", &[1]).unwrap();
    HierarchicalRetriever::new(
        Arc::new(two_level_forest()),
        Arc::new(index),
        Arc::new(two_level_corpus()),
        Arc::new(EmbedBackend::local(64)),
        RetrieverOptions::default().with_depth(depth),
    )
}

// ============================================================================
// Forest construction
// ============================================================================

#[tokio::test]
async fn fallback_forest_of_three_is_well_formed() {
    let forest = build_forest(records(0..3), &ScriptedOracle(None), &ForestOptions::default())
        .await
        .unwrap();
    assert_eq!(forest.tree_count(), 1);
    let tree = &forest.trees()[0];
    assert_eq!(tree.strategy(), HierarchyStrategy::Fallback);
    assert_well_formed(tree);
}

#[tokio::test]
async fn fallback_forest_of_thousand_is_well_formed() {
    let options = ForestOptions {
        max_tree_size: 1000,
        ..ForestOptions::default()
    };
    let forest = build_forest(records(0..1000), &ScriptedOracle(None), &options)
        .await
        .unwrap();
    assert_eq!(forest.tree_count(), 1);
    assert_eq!(forest.node_count(), 1000);
    assert_well_formed(&forest.trees()[0]);
}

#[tokio::test]
async fn oracle_hierarchy_is_applied_when_valid() {
    let oracle = ScriptedOracle(Some(
        "Abstract0 -> root\nAbstract1 -> Abstract0\nAbstract2 -> Abstract1\n".to_string(),
    ));
    let tree = build_tree("doc", records(0..3), &oracle, 4).await.unwrap();
    assert_eq!(tree.strategy(), HierarchyStrategy::Oracle);
    assert_eq!(tree.parent(2), Some(1));
    assert_well_formed(&tree);
}

#[tokio::test]
async fn broken_oracle_hierarchies_fall_back() {
    let responses = [
        // two parents for one child
        "Abstract0 -> root\nAbstract1 -> Abstract0\nAbstract2 -> Abstract0\nAbstract2 -> Abstract1",
        // cycle
        "Abstract0 -> root\nAbstract1 -> Abstract2\nAbstract2 -> Abstract1",
        // no root
        "Abstract1 -> Abstract0\nAbstract2 -> Abstract0",
        "",
    ];
    for response in responses {
        let oracle = ScriptedOracle(Some(response.to_string()));
        let tree = build_tree("doc", records(0..3), &oracle, 4).await.unwrap();
        assert_eq!(tree.strategy(), HierarchyStrategy::Fallback, "{:?}", response);
        assert_well_formed(&tree);
    }
}

#[test]
fn fallback_over_nine_nodes_has_two_sibling_groups() {
    let ids: BTreeSet<PairId> = (0..9).collect();
    let assignments = fallback_assignments(&ids, 4).unwrap();
    assert_eq!(assignments.root, 0);

    let under_root: Vec<PairId> = assignments
        .parents
        .iter()
        .filter(|&(_, &p)| p == 0)
        .map(|(&c, _)| c)
        .collect();
    assert_eq!(under_root, vec![1, 2, 3, 4]);

    let under_first: Vec<PairId> = assignments
        .parents
        .iter()
        .filter(|&(_, &p)| p == 1)
        .map(|(&c, _)| c)
        .collect();
    assert_eq!(under_first, vec![5, 6, 7, 8]);
    assert_eq!(assignments.parents.len(), 8);
}

#[tokio::test]
async fn unkeyed_records_shard_into_bounded_trees() {
    let forest = build_forest(records(0..1200), &ScriptedOracle(None), &ForestOptions::default())
        .await
        .unwrap();
    let sizes: Vec<usize> = forest.trees().iter().map(|t| t.len()).collect();
    assert_eq!(sizes, vec![500, 500, 200]);
    assert_eq!(forest.trees()[0].label(), "tree_1_of_3");
    assert_eq!(forest.tree_of(1100).unwrap().label(), "tree_3_of_3");
}

// ============================================================================
// Entity index
// ============================================================================

#[test]
fn addresses_round_trip_as_a_set() {
    let mut index = EntityAbstractIndex::with_expected_entities(4, 2).unwrap();
    index.set_addresses("e", &[3, 7]).unwrap();
    let got: BTreeSet<PairId> = index.get_addresses("e").unwrap().into_iter().collect();
    assert_eq!(got, BTreeSet::from([3, 7]));

    index.set_addresses("f", &[7, 3]).unwrap();
    let got: BTreeSet<PairId> = index.get_addresses("f").unwrap().into_iter().collect();
    assert_eq!(got, BTreeSet::from([3, 7]));
}

#[test]
fn quoted_and_cased_lookups_match() {
    let mut index = EntityAbstractIndex::with_expected_entities(4, 2).unwrap();
    index.set_addresses("Paris", &[1, 2]).unwrap();
    assert_eq!(index.get_addresses("\"paris\"").unwrap(), vec![1, 2]);
}

#[test]
fn cuckoo_overflow_never_loses_stored_keys() {
    let mut store = CuckooAddressStore::with_capacity(32).unwrap();
    let mut stored = Vec::new();
    let mut overflow = 0;
    for i in 0..100u64 {
        let key = format!("entity {}", i);
        match store.set(&key, vec![i]) {
            Ok(()) => stored.push((key, i)),
            Err(Error::IndexCapacity { .. }) => overflow += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(overflow >= 68);
    for (key, value) in stored {
        assert_eq!(store.get(&key), Some(vec![value]));
    }
}

#[test]
fn paris_and_france_share_pair_zero() {
    let corpus = InMemoryCorpus::new(vec![
        Chunk::new(0, "Paris is a city"),
        Chunk::new(1, "France is a country"),
    ])
    .unwrap();
    let tree = AbstractTree::assemble(
        "default",
        vec![AbstractNode::new(0, "Paris and France", vec![0, 1])],
        0,
        &BTreeMap::new(),
        HierarchyStrategy::Fallback,
    )
    .unwrap();
    let mut forest = AbstractForest::from_trees(vec![tree]).unwrap();

    let mapping =
        build_entity_mapping(&["Paris", "France"], corpus.chunks(), 2, &mut forest).unwrap();
    assert_eq!(mapping["paris"], vec![0]);
    assert_eq!(mapping["france"], vec![0]);
}

// ============================================================================
// Retrieval
// ============================================================================

#[tokio::test]
async fn depth_one_includes_only_the_indexed_abstract() {
    let ctx = retriever(1)
        .retrieve("Where is Paris?", &["paris".to_string()])
        .await
        .unwrap();
    assert!(ctx.text.contains("Paris on the Seine"));
    assert!(!ctx.text.contains("Overview of European capitals"));
}

#[tokio::test]
async fn depth_two_includes_the_parent() {
    let ctx = retriever(2)
        .retrieve("Where is Paris?", &["paris".to_string()])
        .await
        .unwrap();
    assert!(ctx.text.contains("Paris on the Seine"));
    assert!(ctx.text.contains("Overview of European capitals"));
}

#[tokio::test]
async fn no_entities_means_empty_context() {
    let ctx = retriever(2).retrieve("Where is Paris?", &[]).await.unwrap();
    assert!(ctx.is_empty());
    assert!(ctx.blocks.is_empty());
}

// ============================================================================
// Snapshot
// ============================================================================

#[test]
fn snapshot_round_trips_and_detects_staleness() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forest.json");
    let snapshot = ForestSnapshot::new(
        "corpus",
        "v1",
        1,
        2,
        two_level_forest(),
        BTreeMap::from([("paris".to_string(), vec![1])]),
    );
    snapshot.save(&path).unwrap();

    let loaded = ForestSnapshot::load(&path).unwrap();
    assert_eq!(loaded.forest, snapshot.forest);
    assert!(!loaded.is_stale(1, "v1"));
    assert!(loaded.is_stale(2, "v1"));

    let index = loaded.restore_index(2).unwrap();
    assert_eq!(index.get_addresses("Paris").unwrap(), vec![1]);
}
