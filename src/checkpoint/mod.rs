//! Durable checkpoint of the record store.
//!
//! A checkpoint is a single JSON document holding a format version marker and
//! every record. Saves replace the whole file atomically, so the file on disk
//! is always a complete snapshot from some point in the run.
//!
//! # Example
//!
//! ```no_run
//! use recipe_pipeline_core::checkpoint::{CheckpointFile, ProgressPersister};
//! use recipe_pipeline_core::record::RecordStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let checkpoint = CheckpointFile::new("output/processing_progress.json");
//! let store = checkpoint.load()?.unwrap_or_else(RecordStore::new);
//! checkpoint.save(&store)?;
//! # Ok(())
//! # }
//! ```

mod atomic;
mod error;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::record::{Record, RecordStore};

pub use atomic::write_atomic;
pub use error::PersistError;

/// Checkpoint format version written by this build.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Loads and saves the record store.
///
/// Implementations must make `save` atomic: after a crash the previous or the
/// new snapshot is readable, never a partial one.
pub trait ProgressPersister: Send + Sync {
    /// Returns `None` when no checkpoint exists yet.
    ///
    /// # Errors
    ///
    /// Fails when the checkpoint is unreadable or the version is unknown.
    fn load(&self) -> Result<Option<RecordStore>, PersistError>;

    /// Replaces the stored snapshot with `store`.
    ///
    /// # Errors
    ///
    /// Fails when the snapshot cannot be written.
    fn save(&self, store: &RecordStore) -> Result<(), PersistError>;

    /// Moves an unreadable checkpoint out of the way so a fresh run can start.
    ///
    /// Returns where it was moved, if anywhere.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be moved.
    fn set_aside(&self) -> Result<Option<PathBuf>, PersistError> {
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
struct CheckpointDocumentRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    records: BTreeMap<&'a str, &'a Record>,
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CheckpointDocument {
    #[allow(dead_code)]
    saved_at: Option<DateTime<Utc>>,
    records: BTreeMap<String, Record>,
}

/// JSON checkpoint stored at a fixed path.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode(&self, raw: &str) -> Result<RecordStore, PersistError> {
        let probe: VersionProbe =
            serde_json::from_str(raw).map_err(|e| self.corrupt(e.to_string()))?;
        match probe.version {
            Some(CHECKPOINT_VERSION) => {}
            Some(found) => {
                return Err(PersistError::UnsupportedVersion {
                    path: self.path.clone(),
                    found,
                    expected: CHECKPOINT_VERSION,
                });
            }
            None => return Err(self.corrupt("missing version marker".to_string())),
        }

        let document: CheckpointDocument =
            serde_json::from_str(raw).map_err(|e| self.corrupt(e.to_string()))?;

        for (key, record) in &document.records {
            if key != &record.id {
                return Err(self.corrupt(format!(
                    "record key '{key}' does not match its id '{}'",
                    record.id
                )));
            }
        }

        RecordStore::from_records(document.records.into_values()).map_err(|source| {
            PersistError::InvalidRecords {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn corrupt(&self, reason: String) -> PersistError {
        PersistError::CorruptCheckpoint {
            path: self.path.clone(),
            reason,
        }
    }
}

impl ProgressPersister for CheckpointFile {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<Option<RecordStore>, PersistError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no checkpoint found");
                return Ok(None);
            }
            Err(e) => return Err(PersistError::io(&self.path, e)),
        };

        let store = self.decode(&raw)?;
        info!(records = store.len(), "loaded checkpoint");
        Ok(Some(store))
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), records = store.len()))]
    fn save(&self, store: &RecordStore) -> Result<(), PersistError> {
        let document = CheckpointDocumentRef {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            records: store.all().map(|record| (record.id.as_str(), record)).collect(),
        };
        let encoded = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.path, &encoded)?;
        debug!("checkpoint saved");
        Ok(())
    }

    fn set_aside(&self) -> Result<Option<PathBuf>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "checkpoint".into(), |name| name.to_string_lossy());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let target = self
            .path
            .with_file_name(format!("{file_name}.corrupt-{stamp}"));

        fs::rename(&self.path, &target).map_err(|e| PersistError::io(&self.path, e))?;
        warn!(
            from = %self.path.display(),
            to = %target.display(),
            "moved unreadable checkpoint aside"
        );
        Ok(Some(target))
    }
}
