//! Entity-indexed hierarchical retrieval
//!
//! This library provides tools to:
//! - Group raw text chunks into Abstracts and arrange them into per-document trees
//! - Ask a chat model for the hierarchy, with a deterministic fallback layout
//! - Index entities to the Abstracts that mention them (cuckoo hash table)
//! - Retrieve bounded-depth hierarchical context for recognized query entities
//! - Persist the forest and entity map as a JSON snapshot

pub mod analysis;
pub mod config;
pub mod corpus;
pub mod error;
pub mod forest;
pub mod index;
pub mod integrations;
pub mod metrics;
pub mod prompts;
pub mod retrieval;
pub mod session;
pub mod snapshot;

// Re-export common types
pub use config::ForestConfig;
pub use corpus::{Chunk, ChunkStore, InMemoryCorpus};
pub use error::{Error, Result};
pub use forest::{
    build_forest, AbstractForest, AbstractNode, AbstractRecord, AbstractTree, ChunkId,
    HierarchyOracle, HierarchyResult, HierarchyStrategy, PairId,
};
pub use index::{normalize_entity, AddressStore, CuckooAddressStore, EntityAbstractIndex};
pub use integrations::OpenAIClient;
pub use prompts::{load_prompt, Prompt};
pub use retrieval::{AugmentedPrompt, HierarchicalRetriever, RetrievalMode};
pub use session::{RetrievalSession, SnapshotLock};
pub use snapshot::ForestSnapshot;

// Commands use the re-exported types, so they are declared last
pub mod commands;
