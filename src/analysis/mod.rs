//! Text analysis helpers
//!
//! Provides:
//! - embeddings (OpenAI or local hashing) and vector math
//! - a brute-force vector index used for Baseline retrieval

pub mod embeddings;
pub mod vector_index;

pub use embeddings::{cosine_similarity, normalize, EmbedBackend, EmbeddingService, LocalEmbedder};
pub use vector_index::{InMemoryVectorIndex, SearchHit, SearchRecord, VectorIndex};
