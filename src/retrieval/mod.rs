//! Query-time retrieval: entity recognition, hierarchical context and
//! prompt assembly.

pub mod budget;
pub mod prompt;
pub mod recognizer;
pub mod retriever;

pub use budget::{estimate_tokens, truncate_to_tokens};
pub use prompt::{direct_chunks, AugmentedPrompt};
pub use recognizer::{load_vocabulary, EntityRecognizer, VocabularyRecognizer};
pub use retriever::{
    rank_and_dedup, ContextBlock, HierarchicalContext, HierarchicalRetriever, ParentSection,
    RetrievalMode, RetrieverOptions, BLOCK_SEPARATOR,
};
