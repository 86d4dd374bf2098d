//! Forest construction: partitioning, concurrent tree builds, and the
//! forest-wide `pair_id` lookup.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use tracing::{debug, info, warn};

use super::hierarchy::{build_tree, HierarchyOracle};
use super::node::{AbstractNode, AbstractRecord, PairId};
use super::tree::{AbstractTree, HierarchyStrategy};
use crate::config::ForestConfig;
use crate::{Error, Result};

/// Label of the partition holding records without a `group_key`.
pub const DEFAULT_PARTITION: &str = "default";

/// Records that will form one tree.
#[derive(Debug, Clone)]
pub struct Partition {
    pub label: String,
    pub records: Vec<AbstractRecord>,
}

/// Split records by `group_key`.
///
/// When everything lands in the `default` partition and it exceeds
/// `max_tree_size`, it is cut into `pair_id`-ordered shards labelled
/// `tree_{i}_of_{n}`. Keyed partitions are never split.
pub fn partition_records(records: Vec<AbstractRecord>, max_tree_size: usize) -> Result<Vec<Partition>> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        if !seen.insert(record.pair_id) {
            return Err(Error::DuplicatePairId(record.pair_id));
        }
    }

    let mut by_key: BTreeMap<String, Vec<AbstractRecord>> = BTreeMap::new();
    for record in records {
        let key = record
            .group_key
            .clone()
            .unwrap_or_else(|| DEFAULT_PARTITION.to_string());
        by_key.entry(key).or_default().push(record);
    }
    for group in by_key.values_mut() {
        group.sort_by_key(|r| r.pair_id);
    }

    let max_tree_size = max_tree_size.max(1);
    let only_default = by_key.len() == 1 && by_key.contains_key(DEFAULT_PARTITION);
    if only_default {
        if let Some(all) = by_key.remove(DEFAULT_PARTITION) {
            if all.len() > max_tree_size {
                let shard_count = all.len().div_ceil(max_tree_size);
                info!(
                    "Sharding {} unkeyed Abstracts into {} trees of at most {}",
                    all.len(),
                    shard_count,
                    max_tree_size
                );
                return Ok(all
                    .chunks(max_tree_size)
                    .enumerate()
                    .map(|(i, shard)| Partition {
                        label: format!("tree_{}_of_{}", i + 1, shard_count),
                        records: shard.to_vec(),
                    })
                    .collect());
            }
            by_key.insert(DEFAULT_PARTITION.to_string(), all);
        }
    }

    Ok(by_key
        .into_iter()
        .map(|(label, records)| Partition { label, records })
        .collect())
}

/// Knobs for [`build_forest`].
#[derive(Debug, Clone)]
pub struct ForestOptions {
    pub max_tree_size: usize,
    pub tree_concurrency: usize,
    pub sibling_group_size: usize,
}

impl Default for ForestOptions {
    fn default() -> Self {
        Self::from(&ForestConfig::defaults())
    }
}

impl From<&ForestConfig> for ForestOptions {
    fn from(config: &ForestConfig) -> Self {
        Self {
            max_tree_size: config.max_tree_size,
            tree_concurrency: config.tree_concurrency,
            sibling_group_size: config.sibling_group_size,
        }
    }
}

/// Build one tree per partition on a bounded pool. A failing tree is logged
/// and left out; the others still complete.
pub async fn build_forest<O: HierarchyOracle>(
    records: Vec<AbstractRecord>,
    oracle: &O,
    options: &ForestOptions,
) -> Result<AbstractForest> {
    let partitions = partition_records(records, options.max_tree_size)?;
    let partition_count = partitions.len();
    let concurrency = options.tree_concurrency.clamp(1, partition_count.max(1));
    let sibling_group_size = options.sibling_group_size;

    info!(
        "Building {} trees (concurrency {})",
        partition_count, concurrency
    );

    let built = build_partitions(partitions, concurrency, move |partition: Partition| async move {
        build_tree(&partition.label, partition.records, oracle, sibling_group_size).await
    })
    .await;

    let forest = AbstractForest::from_trees(built)?;

    let stats = forest.stats();
    info!(
        trees = stats.trees,
        nodes = stats.nodes,
        oracle = stats.oracle_trees,
        fallback = stats.fallback_trees,
        "Forest finalized"
    );
    if stats.trees < partition_count {
        warn!("{} of {} trees failed to build", partition_count - stats.trees, partition_count);
    }
    Ok(forest)
}

/// Run `build` over every partition with at most `concurrency` in flight.
/// A failed partition is logged and left out. Trees come back in
/// partition order.
async fn build_partitions<F, Fut>(
    partitions: Vec<Partition>,
    concurrency: usize,
    build: F,
) -> Vec<AbstractTree>
where
    F: Fn(Partition) -> Fut,
    Fut: Future<Output = Result<AbstractTree>>,
{
    let mut built: Vec<(usize, AbstractTree)> = stream::iter(partitions.into_iter().enumerate())
        .map(|(index, partition)| {
            let label = partition.label.clone();
            let pending = build(partition);
            async move {
                match pending.await {
                    Ok(tree) => Some((index, tree)),
                    Err(err) => {
                        warn!(tree = %label, "Skipping tree: {}", err);
                        None
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|res| async move { res })
        .collect()
        .await;

    built.sort_by_key(|(index, _)| *index);
    built.into_iter().map(|(_, tree)| tree).collect()
}

/// Ordered trees plus a `pair_id -> tree index` lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AbstractTree>", into = "Vec<AbstractTree>")]
pub struct AbstractForest {
    trees: Vec<AbstractTree>,
    lookup: HashMap<PairId, usize>,
}

/// Summary numbers for logs and `inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForestStats {
    pub trees: usize,
    pub nodes: usize,
    pub oracle_trees: usize,
    pub fallback_trees: usize,
    pub max_depth: usize,
    pub largest_tree: usize,
}

impl AbstractForest {
    /// Finalize trees. Each must pass [`AbstractTree::validate`] and
    /// `pair_id`s must be unique across all of them.
    pub fn from_trees(trees: Vec<AbstractTree>) -> Result<Self> {
        let mut lookup = HashMap::new();
        for (index, tree) in trees.iter().enumerate() {
            tree.validate().map_err(|violation| Error::TreeBuild {
                label: tree.label().to_string(),
                reason: violation.to_string(),
            })?;
            for pair_id in tree.pair_ids() {
                if lookup.insert(pair_id, index).is_some() {
                    return Err(Error::DuplicatePairId(pair_id));
                }
            }
        }
        debug!("Forest lookup covers {} Abstracts", lookup.len());
        Ok(Self { trees, lookup })
    }

    pub fn trees(&self) -> &[AbstractTree] {
        &self.trees
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn node_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn contains(&self, pair_id: PairId) -> bool {
        self.lookup.contains_key(&pair_id)
    }

    /// Tree index and node for `pair_id`.
    pub fn locate(&self, pair_id: PairId) -> Option<(usize, &AbstractNode)> {
        let index = *self.lookup.get(&pair_id)?;
        let node = self.trees.get(index)?.get(pair_id)?;
        Some((index, node))
    }

    pub fn node(&self, pair_id: PairId) -> Option<&AbstractNode> {
        self.locate(pair_id).map(|(_, node)| node)
    }

    pub fn tree_of(&self, pair_id: PairId) -> Option<&AbstractTree> {
        self.lookup.get(&pair_id).and_then(|&i| self.trees.get(i))
    }

    /// The direct parent node, if any.
    pub fn parent_of(&self, pair_id: PairId) -> Option<&AbstractNode> {
        let tree = self.tree_of(pair_id)?;
        tree.get(tree.parent(pair_id)?)
    }

    pub fn tree_by_label(&self, label: &str) -> Option<&AbstractTree> {
        self.trees.iter().find(|t| t.label() == label)
    }

    /// All nodes, tree by tree.
    pub fn nodes(&self) -> impl Iterator<Item = &AbstractNode> {
        self.trees.iter().flat_map(|t| t.nodes())
    }

    pub(crate) fn node_mut(&mut self, pair_id: PairId) -> Option<&mut AbstractNode> {
        let index = *self.lookup.get(&pair_id)?;
        self.trees.get_mut(index)?.get_mut(pair_id)
    }

    pub fn stats(&self) -> ForestStats {
        let mut stats = ForestStats {
            trees: self.trees.len(),
            nodes: self.node_count(),
            ..Default::default()
        };
        for tree in &self.trees {
            match tree.strategy() {
                HierarchyStrategy::Oracle => stats.oracle_trees += 1,
                HierarchyStrategy::Fallback => stats.fallback_trees += 1,
            }
            stats.max_depth = stats.max_depth.max(tree.depth());
            stats.largest_tree = stats.largest_tree.max(tree.len());
        }
        stats
    }
}

impl TryFrom<Vec<AbstractTree>> for AbstractForest {
    type Error = Error;

    fn try_from(trees: Vec<AbstractTree>) -> Result<Self> {
        Self::from_trees(trees)
    }
}

impl From<AbstractForest> for Vec<AbstractTree> {
    fn from(forest: AbstractForest) -> Self {
        forest.trees
    }
}
