//! Abstract forest: grouping chunks into Abstracts, per-partition hierarchy
//! trees, and forest-wide lookup.

pub mod abstracts;
pub mod builder;
pub mod hierarchy;
pub mod node;
pub mod tree;

pub use abstracts::{
    build_abstract_records, group_chunks, AbstractSummarizer, ChunkGroup, ConcatSummarizer,
    LlmSummarizer,
};
pub use builder::{
    build_forest, partition_records, AbstractForest, ForestOptions, ForestStats, Partition,
    DEFAULT_PARTITION,
};
pub use hierarchy::{
    build_tree, evaluate, fallback_assignments, parse_assignments, Assignments, HierarchyOracle,
    HierarchyResult, InvalidReason, LlmHierarchyOracle, ParentRef,
};
pub use node::{AbstractNode, AbstractRecord, ChunkId, PairId};
pub use tree::{AbstractTree, HierarchyStrategy, TreeViolation};
