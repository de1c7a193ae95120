//! Error types for checkpoint persistence.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::record::StoreError;

/// Errors that can occur while loading or saving a checkpoint.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The checkpoint exists but cannot be parsed.
    #[error(
        "checkpoint {path} is corrupt: {reason}\n  Suggestion: Rerun with --fresh to set it aside and start over"
    )]
    CorruptCheckpoint {
        /// Checkpoint path
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// The checkpoint was written by an incompatible format version.
    #[error(
        "checkpoint {path} has unsupported version {found} (expected {expected})\n  Suggestion: Rerun with --fresh to set it aside and start over"
    )]
    UnsupportedVersion {
        /// Checkpoint path
        path: PathBuf,
        /// Version marker in the file
        found: u32,
        /// Version this build writes
        expected: u32,
    },

    /// The checkpoint parsed but its records are inconsistent.
    #[error("checkpoint {path} is invalid: {source}")]
    InvalidRecords {
        /// Checkpoint path
        path: PathBuf,
        /// Store-level problem
        #[source]
        source: StoreError,
    },

    /// Filesystem failure while reading or writing.
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Serializing the snapshot failed.
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),

    /// The background task writing the snapshot panicked or was cancelled.
    #[error("checkpoint writer task failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the on-disk file is unreadable rather than the disk failing.
    #[must_use]
    pub fn is_unreadable_checkpoint(&self) -> bool {
        matches!(
            self,
            Self::CorruptCheckpoint { .. }
                | Self::UnsupportedVersion { .. }
                | Self::InvalidRecords { .. }
        )
    }
}
