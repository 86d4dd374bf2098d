//! Error types for the Abstract forest

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Entity index used before initialize()")]
    IndexNotInitialized,

    #[error("Entity index capacity exceeded while inserting '{key}' (capacity {capacity})")]
    IndexCapacity { key: String, capacity: usize },

    #[error("Entity index backing store unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Duplicate pair_id {0} in Abstract records")]
    DuplicatePairId(u64),

    #[error("Tree build failed for '{label}': {reason}")]
    TreeBuild { label: String, reason: String },

    #[error("Hierarchy oracle error: {0}")]
    Oracle(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Snapshot is stale: {0}")]
    StaleSnapshot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to acquire snapshot lock: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Oracle(err.to_string())
    }
}

impl Error {
    /// Whether the error means EntityIndexed retrieval cannot be served and the
    /// caller should degrade to Baseline.
    pub fn is_index_unavailable(&self) -> bool {
        matches!(
            self,
            Error::IndexUnavailable(_) | Error::IndexNotInitialized | Error::StaleSnapshot(_)
        )
    }
}
