//! Raw chunk corpus
//!
//! Chunks are immutable and addressed by a stable integer id. The in-memory
//! corpus loads them from a JSONL file or a directory of `.txt` documents.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::forest::ChunkId;

/// A raw text chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
}

impl Chunk {
    pub fn new(id: ChunkId, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            group_key: None,
        }
    }

    pub fn with_group_key(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }
}

/// Read access to chunk text by id.
pub trait ChunkStore: Send + Sync {
    fn get_chunk(&self, id: ChunkId) -> Option<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Corpus held fully in memory, ordered by chunk id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    chunks: BTreeMap<ChunkId, Chunk>,
}

impl InMemoryCorpus {
    /// Build from chunks; duplicate ids are rejected.
    pub fn new(chunks: impl IntoIterator<Item = Chunk>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for chunk in chunks {
            let id = chunk.id;
            if map.insert(id, chunk).is_some() {
                return Err(Error::InvalidArgument(format!("duplicate chunk id {}", id)));
            }
        }
        Ok(Self { chunks: map })
    }

    /// Load a JSONL file (`{"id", "content", "group_key"?}` per line) or a
    /// directory of `.txt` files.
    pub fn load(path: impl AsRef<Path>, group_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::load_text_dir(path, group_size)
        } else {
            Self::load_jsonl(path)
        }
    }

    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut chunks = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(line).map_err(|e| {
                Error::SerializationError(format!("{}:{}: {}", path.display(), line_no + 1, e))
            })?;
            chunks.push(chunk);
        }
        info!("Loaded {} chunks from {}", chunks.len(), path.display());
        Self::new(chunks)
    }

    /// Split every `.txt` file under `dir` into paragraph chunks keyed by
    /// file name. Each file starts on a multiple of `group_size` so no
    /// Abstract spans two documents.
    pub fn load_text_dir(dir: impl AsRef<Path>, group_size: usize) -> Result<Self> {
        let dir = dir.as_ref();
        let align = group_size.max(1) as u64;

        let mut files: Vec<_> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "txt"))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        let mut chunks = Vec::new();
        let mut next_id: u64 = 0;
        for file in files {
            let text = fs::read_to_string(&file)?;
            let key = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let paragraphs = split_paragraphs(&text);
            debug!("{}: {} paragraphs", key, paragraphs.len());
            if paragraphs.is_empty() {
                continue;
            }

            if next_id % align != 0 {
                next_id += align - next_id % align;
            }
            for paragraph in paragraphs {
                chunks.push(Chunk::new(next_id, paragraph).with_group_key(key.clone()));
                next_id += 1;
            }
        }

        info!("Loaded {} chunks from {}", chunks.len(), dir.display());
        Self::new(chunks)
    }

    /// Chunks in ascending id order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    /// Content hash over ids and text, usable as a corpus version.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        for chunk in self.chunks.values() {
            chunk.id.hash(&mut hasher);
            chunk.content.hash(&mut hasher);
            chunk.group_key.hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}

impl ChunkStore for InMemoryCorpus {
    fn get_chunk(&self, id: ChunkId) -> Option<String> {
        self.chunks.get(&id).map(|chunk| chunk.content.clone())
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}
