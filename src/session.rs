//! Query session state and snapshot file locking
//!
//! Provides:
//! - `RetrievalSession`: per-run state passed through the query path
//! - `SnapshotLock`: exclusive fs2 lock held while a snapshot is written

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::retrieval::RetrievalMode;

/// Lock guard on `<snapshot>.lock`, released on drop.
pub struct SnapshotLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl SnapshotLock {
    /// Lock file path for a snapshot path.
    pub fn lock_path(snapshot: &Path) -> PathBuf {
        let mut name = snapshot.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire an exclusive lock, failing immediately if another writer holds it.
    pub fn acquire(snapshot: &Path) -> Result<Self> {
        let path = Self::lock_path(snapshot);
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open {}: {}", path.display(), e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired {}", path.display());
                Ok(Self {
                    path,
                    lock_file: Some(lock_file),
                })
            }
            Err(_) => Err(Error::LockError(format!(
                "{} is held by another writer",
                path.display()
            ))),
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(ref file) = self.lock_file {
            let _ = file.unlock();
        }
        if self.lock_file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// State carried through one query run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSession {
    source_table: String,
    entity_count: usize,
    last_query_entity_count: usize,
    mode: RetrievalMode,
}

impl RetrievalSession {
    pub fn new(source_table: impl Into<String>, entity_count: usize, mode: RetrievalMode) -> Self {
        Self {
            source_table: source_table.into(),
            entity_count,
            last_query_entity_count: 0,
            mode,
        }
    }

    /// Source corpus identifier of the loaded snapshot.
    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    /// Entity count recorded in the loaded snapshot.
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn last_query_entity_count(&self) -> usize {
        self.last_query_entity_count
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn record_query(&mut self, recognized: usize) {
        self.last_query_entity_count = recognized;
    }

    /// Drop to Baseline for the rest of the session.
    pub fn degrade(&mut self, reason: &str) {
        if self.mode == RetrievalMode::EntityIndexed {
            warn!("Falling back to baseline retrieval: {}", reason);
        }
        self.mode = RetrievalMode::Baseline;
    }
}
