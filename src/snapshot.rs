//! Persisted forest snapshot.
//!
//! The forest and the entity map are stored as one JSON document. The entity
//! index itself is rebuilt from the map on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::forest::{AbstractForest, ChunkId, PairId};
use crate::index::{populate_index, EntityAbstractIndex};
use crate::session::SnapshotLock;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestSnapshot {
    pub version: u32,
    pub corpus_version: String,
    pub source_table: String,
    pub entity_count: usize,
    pub group_size: usize,
    pub built_at: DateTime<Utc>,
    pub build_id: Uuid,
    pub forest: AbstractForest,
    pub entity_map: BTreeMap<String, Vec<PairId>>,
}

impl ForestSnapshot {
    pub fn new(
        source_table: impl Into<String>,
        corpus_version: impl Into<String>,
        entity_count: usize,
        group_size: usize,
        forest: AbstractForest,
        entity_map: BTreeMap<String, Vec<PairId>>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            corpus_version: corpus_version.into(),
            source_table: source_table.into(),
            entity_count,
            group_size,
            built_at: Utc::now(),
            build_id: Uuid::new_v4(),
            forest,
            entity_map,
        }
    }

    /// Write atomically: serialize to a sibling temp file, then rename over
    /// `path`, holding `<path>.lock` throughout.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let _lock = SnapshotLock::acquire(path)?;
        let tmp = temp_path(path, self.build_id);

        let written = (|| -> Result<()> {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })();
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        fs::rename(&tmp, path)?;
        info!(
            "Saved snapshot {} ({} trees, {} entities) to {}",
            self.build_id,
            self.forest.tree_count(),
            self.entity_map.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let snapshot: ForestSnapshot = serde_json::from_str(&content)
            .map_err(|e| Error::SerializationError(format!("{}: {}", path.display(), e)))?;
        info!(
            "Loaded snapshot {} built {} ({} Abstracts)",
            snapshot.build_id,
            snapshot.built_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.forest.node_count()
        );
        Ok(snapshot)
    }

    /// True when the snapshot no longer matches the current vocabulary or
    /// corpus and must be rebuilt.
    pub fn is_stale(&self, expected_entity_count: usize, corpus_version: &str) -> bool {
        self.staleness(expected_entity_count, corpus_version).is_some()
    }

    /// `Error::StaleSnapshot` describing the first mismatch, if any.
    pub fn ensure_fresh(&self, expected_entity_count: usize, corpus_version: &str) -> Result<()> {
        match self.staleness(expected_entity_count, corpus_version) {
            Some(reason) => Err(Error::StaleSnapshot(reason)),
            None => Ok(()),
        }
    }

    fn staleness(&self, expected_entity_count: usize, corpus_version: &str) -> Option<String> {
        if self.version != SNAPSHOT_VERSION {
            return Some(format!(
                "format version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            ));
        }
        if self.entity_count != expected_entity_count {
            return Some(format!(
                "entity count {} (expected {})",
                self.entity_count, expected_entity_count
            ));
        }
        if self.corpus_version != corpus_version {
            return Some(format!(
                "corpus version '{}' (expected '{}')",
                self.corpus_version, corpus_version
            ));
        }
        None
    }

    /// Rebuild the entity index from the persisted map.
    pub fn restore_index(&self, margin: usize) -> Result<EntityAbstractIndex> {
        let expected = self.entity_count.max(self.entity_map.len());
        let mut index = EntityAbstractIndex::with_expected_entities(expected, margin)?;
        let dangling = self
            .entity_map
            .values()
            .flatten()
            .filter(|id| !self.forest.contains(**id))
            .count();
        if dangling > 0 {
            warn!("Snapshot entity map holds {} addresses outside the forest", dangling);
        }
        populate_index(&mut index, &self.entity_map)?;
        Ok(index)
    }
}

fn temp_path(path: &Path, build_id: Uuid) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}.tmp", build_id.simple()));
    PathBuf::from(name)
}

/// Parse a `chunk_ids` metadata string: `"[1, 2]"` or `"1,2"`. A bracketed
/// list that fails to parse yields nothing; in the comma form, non-numeric
/// parts are skipped.
pub fn parse_chunk_ids(raw: &str) -> Vec<ChunkId> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw).unwrap_or_default();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// Accept `chunk_ids` as a list, or as a string in either
/// [`parse_chunk_ids`] form. Anything else becomes an empty list.
pub(crate) fn deserialize_chunk_ids<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<ChunkId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawChunkIds {
        List(Vec<ChunkId>),
        Text(String),
        Other(serde_json::Value),
    }

    Ok(match RawChunkIds::deserialize(deserializer)? {
        RawChunkIds::List(ids) => ids,
        RawChunkIds::Text(raw) => parse_chunk_ids(&raw),
        RawChunkIds::Other(value) => {
            warn!("Unreadable chunk_ids {}, using an empty list", value);
            Vec::new()
        }
    })
}
