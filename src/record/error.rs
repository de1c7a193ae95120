//! Error types for record store operations.

use thiserror::Error;

use super::item::{Stage, StageStatus};

/// Errors that can occur while reading or mutating the record store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record with this id.
    #[error(
        "record not found: {0}\n  Suggestion: Run with --status to list known record ids"
    )]
    RecordNotFound(String),

    /// Reset was requested for a record that has not failed.
    #[error("record {id} is {status}, only failed records can be reset")]
    NotFailed {
        /// Record id
        id: String,
        /// Its current status
        status: StageStatus,
    },

    /// Artifact does not match the record's current stage.
    #[error("record {id} is {status}, cannot apply a {stage} result")]
    StageMismatch {
        /// Record id
        id: String,
        /// Its current status
        status: StageStatus,
        /// Stage the result came from
        stage: Stage,
    },

    /// Two records share one id.
    #[error(
        "duplicate record id: {0}\n  Suggestion: The checkpoint file was edited by hand; remove the duplicate entry"
    )]
    DuplicateId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_not_found_message() {
        let msg = StoreError::RecordNotFound("DAbc123".to_string()).to_string();
        assert!(msg.contains("DAbc123"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_store_error_stage_mismatch_message() {
        let msg = StoreError::StageMismatch {
            id: "x".to_string(),
            status: StageStatus::Published,
            stage: Stage::Extract,
        }
        .to_string();
        assert!(msg.contains("published"));
        assert!(msg.contains("extract"));
    }
}
