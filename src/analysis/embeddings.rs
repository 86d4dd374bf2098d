//! Embedding backends used to rank context blocks against a query

use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as AsyncOpenAIClient,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const MAX_EMBED_CHARS: usize = 8000;

/// The embeddings endpoint rejects more inputs than this in one request.
pub const MAX_INPUTS_PER_REQUEST: usize = 2048;

/// Inputs per request. Kept well under the per-request token cap.
pub const DEFAULT_EMBED_BATCH: usize = 128;

const EMBED_CONCURRENCY: usize = 4;

/// Service for generating text embeddings through the OpenAI API
pub struct EmbeddingService {
    client: AsyncOpenAIClient<OpenAIConfig>,
    model: String,
    batch_size: usize,
}

impl EmbeddingService {
    /// Create a new embedding service from `OPENAI_API_KEY`
    pub fn new() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Embedding("OPENAI_API_KEY not set".to_string()))?;

        Ok(Self::from_config(OpenAIConfig::new().with_api_key(api_key)))
    }

    pub fn from_config(config: OpenAIConfig) -> Self {
        Self {
            client: AsyncOpenAIClient::with_config(config),
            model: "text-embedding-3-small".to_string(),
            batch_size: DEFAULT_EMBED_BATCH,
        }
    }

    /// Create with custom model
    pub fn with_model(model: impl Into<String>) -> Result<Self> {
        let mut service = Self::new()?;
        service.model = model.into();
        Ok(service)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_INPUTS_PER_REQUEST);
        self
    }

    /// Generate embeddings for multiple texts, `batch_size` inputs per
    /// request with a few requests in flight. Blank inputs map to empty
    /// vectors at the same position.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut positions = Vec::with_capacity(texts.len());
        let mut processed = Vec::with_capacity(texts.len());
        for (pos, text) in texts.iter().enumerate() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                positions.push(pos);
                processed.push(trimmed.chars().take(MAX_EMBED_CHARS).collect::<String>());
            }
        }

        if processed.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        let batches: Vec<Vec<String>> = processed
            .chunks(self.batch_size)
            .map(|batch| batch.to_vec())
            .collect();
        let request_count = batches.len();
        debug!(
            "Generating embeddings for {} texts in {} requests",
            processed.len(),
            request_count
        );

        let mut done: Vec<(usize, Vec<Vec<f32>>)> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| async move {
                self.embed_request(batch).await.map(|embeddings| (index, embeddings))
            })
            .buffer_unordered(EMBED_CONCURRENCY)
            .try_collect()
            .await?;
        done.sort_by_key(|(index, _)| *index);

        let mut result = vec![Vec::new(); texts.len()];
        let embeddings = done.into_iter().flat_map(|(_, batch)| batch);
        for (pos, embedding) in positions.into_iter().zip(embeddings) {
            result[pos] = embedding;
        }

        info!(
            "Generated {} embeddings in {} requests",
            processed.len(),
            request_count
        );
        Ok(result)
    }

    async fn embed_request(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = inputs.len();
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(inputs))
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        debug!("Embedding request used {} tokens", response.usage.total_tokens);

        let mut data = response.data;
        if data.len() != expected {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                expected,
                data.len()
            )));
        }
        data.sort_by_key(|embedding| embedding.index);
        Ok(data.into_iter().map(|embedding| embedding.embedding).collect())
    }

    pub fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }
}

/// Deterministic hashing embedder for offline use and tests.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dim: usize,
}

impl LocalEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vec = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dim;
            vec[idx] += 1.0;
        }

        normalize(&mut vec);
        vec
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }
}

/// Embedding model used for block ranking and the in-memory vector index.
#[allow(clippy::large_enum_variant)]
pub enum EmbedBackend {
    OpenAI(EmbeddingService),
    Local(LocalEmbedder),
}

impl EmbedBackend {
    /// OpenAI embeddings when a key is available, otherwise local hashing.
    pub fn from_env(local_dim: usize) -> Self {
        match EmbeddingService::new() {
            Ok(service) => {
                info!("Using OpenAI embeddings");
                EmbedBackend::OpenAI(service)
            }
            Err(err) => {
                warn!("Falling back to local embeddings ({err})");
                EmbedBackend::Local(LocalEmbedder::new(local_dim))
            }
        }
    }

    pub fn local(dim: usize) -> Self {
        EmbedBackend::Local(LocalEmbedder::new(dim))
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self {
            EmbedBackend::OpenAI(service) => service.embed_batch(texts).await,
            EmbedBackend::Local(local) => Ok(texts.iter().map(|t| local.embed(t)).collect()),
        }
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    pub fn dimension(&self) -> usize {
        match self {
            EmbedBackend::OpenAI(service) => service.dimension(),
            EmbedBackend::Local(local) => local.dimension(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EmbedBackend::Local(_))
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}
