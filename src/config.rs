//! Configuration for forest construction and hierarchical retrieval
//!
//! Loads configuration from forest.yml, with `.env` and environment overrides
//! for LLM credentials.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Default constants (fallback if forest.yml not found)
pub const CONFIG_FILE: &str = "forest.yml";
pub const DEFAULT_GROUP_SIZE: usize = 2;
pub const DEFAULT_SIBLING_GROUP_SIZE: usize = 4;
pub const DEFAULT_MAX_TREE_SIZE: usize = 500;
pub const DEFAULT_TREE_CONCURRENCY: usize = 5;
pub const DEFAULT_CAPACITY_MARGIN: usize = 2;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 1;
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.9;
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 16_385;
pub const DEFAULT_RESERVED_TOKENS: usize = 500;
pub const DEFAULT_EMBEDDING_DIM: usize = 256;
pub const DEFAULT_ABSTRACT_CHAR_BUDGET: usize = 2_000;
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    forest: Option<ForestSection>,
    index: Option<IndexSection>,
    retrieval: Option<RetrievalSection>,
    llm: Option<LlmSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ForestSection {
    group_size: Option<usize>,
    sibling_group_size: Option<usize>,
    max_tree_size: Option<usize>,
    tree_concurrency: Option<usize>,
    abstract_char_budget: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexSection {
    capacity_margin: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalSection {
    top_k: Option<usize>,
    max_hierarchy_depth: Option<usize>,
    dedup_threshold: Option<f32>,
    max_context_tokens: Option<usize>,
    reserved_tokens: Option<usize>,
    embedding_dim: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmSection {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
}

/// Credentials and endpoint for the OpenAI-compatible chat service.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl LlmConfig {
    /// True when a non-empty API key is available.
    pub fn has_credentials(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct ForestConfig {
    /// Chunks per Abstract; `pair_id = chunk_id / group_size`
    pub group_size: usize,
    /// Nodes per batch in the deterministic fallback hierarchy
    pub sibling_group_size: usize,
    /// Max Abstracts per tree when an unkeyed partition is sharded
    pub max_tree_size: usize,
    /// Bounded worker pool size for tree construction
    pub tree_concurrency: usize,
    /// Index capacity = distinct entities * margin (clamped to >= 2)
    pub capacity_margin: usize,
    /// Addresses kept per entity at query time
    pub top_k: usize,
    /// Parent hops traversed at query time (1 or 2)
    pub max_hierarchy_depth: usize,
    /// Blocks more similar than this to a kept block are dropped
    pub dedup_threshold: f32,
    pub max_context_tokens: usize,
    pub reserved_tokens: usize,
    /// Local embedding dimension
    pub embedding_dim: usize,
    /// Character cap on concatenated Abstract content
    pub abstract_char_budget: usize,
    pub llm: LlmConfig,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ForestConfig {
    /// Load configuration from forest.yml or use defaults.
    /// Environment variables take precedence over forest.yml values.
    pub fn new() -> Self {
        Self::load_from_file(CONFIG_FILE)
            .or_else(|_| Self::load_from_file(format!("../{}", CONFIG_FILE)))
            .unwrap_or_else(|_| {
                Self::load_dotenv();
                Self::defaults()
            })
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_keys: &[&str]) -> Option<String> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
                return Self::first_env(env_keys);
            }
        }
        Self::first_env(env_keys).or(value)
    }

    fn first_env(keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|key| std::env::var(key).ok())
            .filter(|v| !v.trim().is_empty())
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let yaml: YamlConfig = if content.trim().is_empty() {
            YamlConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let forest = yaml.forest.unwrap_or_default();
        let index = yaml.index.unwrap_or_default();
        let retrieval = yaml.retrieval.unwrap_or_default();
        let llm = yaml.llm.unwrap_or_default();

        let defaults = Self::defaults();
        let config = Self {
            group_size: forest.group_size.unwrap_or(defaults.group_size),
            sibling_group_size: forest
                .sibling_group_size
                .unwrap_or(defaults.sibling_group_size),
            max_tree_size: forest.max_tree_size.unwrap_or(defaults.max_tree_size),
            tree_concurrency: forest.tree_concurrency.unwrap_or(defaults.tree_concurrency),
            capacity_margin: index.capacity_margin.unwrap_or(defaults.capacity_margin),
            top_k: retrieval.top_k.unwrap_or(defaults.top_k),
            max_hierarchy_depth: retrieval
                .max_hierarchy_depth
                .unwrap_or(defaults.max_hierarchy_depth),
            dedup_threshold: retrieval
                .dedup_threshold
                .unwrap_or(defaults.dedup_threshold),
            max_context_tokens: retrieval
                .max_context_tokens
                .unwrap_or(defaults.max_context_tokens),
            reserved_tokens: retrieval
                .reserved_tokens
                .unwrap_or(defaults.reserved_tokens),
            embedding_dim: retrieval.embedding_dim.unwrap_or(defaults.embedding_dim),
            abstract_char_budget: forest
                .abstract_char_budget
                .unwrap_or(defaults.abstract_char_budget),
            llm: LlmConfig {
                api_key: Self::resolve_env_string(llm.api_key, &["ARK_API_KEY", "OPENAI_API_KEY"]),
                base_url: Self::resolve_env_string(llm.base_url, &["BASE_URL"])
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model: Self::resolve_env_string(llm.model, &["MODEL_NAME"])
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Create config with defaults; LLM credentials still come from the environment.
    pub fn defaults() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            sibling_group_size: DEFAULT_SIBLING_GROUP_SIZE,
            max_tree_size: DEFAULT_MAX_TREE_SIZE,
            tree_concurrency: DEFAULT_TREE_CONCURRENCY,
            capacity_margin: DEFAULT_CAPACITY_MARGIN,
            top_k: DEFAULT_TOP_K,
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            reserved_tokens: DEFAULT_RESERVED_TOKENS,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            abstract_char_budget: DEFAULT_ABSTRACT_CHAR_BUDGET,
            llm: LlmConfig {
                api_key: Self::first_env(&["ARK_API_KEY", "OPENAI_API_KEY"]),
                base_url: Self::first_env(&["BASE_URL"])
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model: Self::first_env(&["MODEL_NAME"])
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            },
        }
    }

    /// Reject values the forest builder cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.group_size == 0 {
            return Err(Error::Config("forest.group_size must be >= 1".into()));
        }
        if self.sibling_group_size == 0 {
            return Err(Error::Config("forest.sibling_group_size must be >= 1".into()));
        }
        if self.max_tree_size == 0 {
            return Err(Error::Config("forest.max_tree_size must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.dedup_threshold) {
            return Err(Error::Config(
                "retrieval.dedup_threshold must be within [0, 1]".into(),
            ));
        }
        if self.reserved_tokens >= self.max_context_tokens {
            return Err(Error::Config(
                "retrieval.reserved_tokens must be below max_context_tokens".into(),
            ));
        }
        Ok(())
    }

    /// Token budget for each of the two context sections (direct chunks and
    /// hierarchical context).
    pub fn section_token_budget(&self) -> usize {
        self.max_context_tokens.saturating_sub(self.reserved_tokens) / 2
    }

    /// Remove LLM credentials so every tree uses the deterministic fallback.
    pub fn offline(mut self) -> Self {
        self.llm.api_key = None;
        self
    }
}
