//! Record types, stage status and per-stage artifacts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreError;
use crate::stage::{CaptionArtifact, PublishedPage, Recipe};

/// Progress of a record through the pipeline.
///
/// Statuses only move forward (`Pending` to `Published`) or to `Failed`.
/// The one exception is an operator reset of a `Failed` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// No stage has completed yet.
    Pending,
    /// The caption is stored; extraction is next.
    CaptionFetched,
    /// The structured recipe is stored; publishing is next.
    Structured,
    /// The recipe has a public URL.
    Published,
    /// A stage gave up.
    Failed,
}

impl StageStatus {
    /// Returns the checkpoint string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::CaptionFetched => "caption_fetched",
            Self::Structured => "structured",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `Published` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Failed)
    }

    /// Returns the stage that runs next from this status.
    #[must_use]
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            Self::Pending => Some(Stage::Fetch),
            Self::CaptionFetched => Some(Stage::Extract),
            Self::Structured => Some(Stage::Publish),
            Self::Published | Self::Failed => None,
        }
    }

    /// Ordinal along the success path, used to check monotonic progress.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::CaptionFetched => 1,
            Self::Structured => 2,
            Self::Published | Self::Failed => 3,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "caption_fetched" => Ok(Self::CaptionFetched),
            "structured" => Ok(Self::Structured),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid stage status: {s}")),
        }
    }
}

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Extract,
    Publish,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Publish => "publish",
        }
    }

    /// Status a record reaches when this stage succeeds.
    #[must_use]
    pub fn completed_status(&self) -> StageStatus {
        match self {
            Self::Fetch => StageStatus::CaptionFetched,
            Self::Extract => StageStatus::Structured,
            Self::Publish => StageStatus::Published,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse classification of a stage failure, stored with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    RateLimited,
    ServerError,
    Unavailable,
    NotFound,
    Auth,
    Rejected,
    MissingCaption,
    Malformed,
    Schema,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Unavailable => "unavailable",
            Self::NotFound => "not_found",
            Self::Auth => "auth",
            Self::Rejected => "rejected",
            Self::MissingCaption => "missing_caption",
            Self::Malformed => "malformed",
            Self::Schema => "schema",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The most recent failure seen for a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Per-stage outputs. Each slot is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<CaptionArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<Recipe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedPage>,
}

impl Artifacts {
    fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Fetch => self.caption.is_some(),
            Stage::Extract => self.recipe.is_some(),
            Stage::Publish => self.published.is_some(),
        }
    }
}

/// Output of one successful stage call.
#[derive(Debug, Clone, PartialEq)]
pub enum StageArtifact {
    Caption(CaptionArtifact),
    Recipe(Recipe),
    Published(PublishedPage),
}

impl StageArtifact {
    /// The stage that produces this artifact.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Caption(_) => Stage::Fetch,
            Self::Recipe(_) => Stage::Extract,
            Self::Published(_) => Stage::Publish,
        }
    }
}

/// Per-item pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier derived from the source item.
    pub id: String,
    /// First-seen ordinal; output order follows it.
    pub position: usize,
    /// Post URL the record was created from.
    pub source_url: String,
    /// Caption supplied by the input collection, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_caption: Option<String>,
    pub stage_status: StageStatus,
    /// Failed attempts of the current stage.
    pub attempts: u32,
    /// Stage that gave up, set only while `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(default)]
    pub artifacts: Artifacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Creates a `Pending` record.
    #[must_use]
    pub fn new(id: impl Into<String>, source_url: impl Into<String>, position: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            position,
            source_url: source_url.into(),
            inline_caption: None,
            stage_status: StageStatus::Pending,
            attempts: 0,
            failed_stage: None,
            artifacts: Artifacts::default(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stage_status.is_terminal()
    }

    #[must_use]
    pub fn next_stage(&self) -> Option<Stage> {
        self.stage_status.next_stage()
    }

    /// Stores the artifact of the current stage and advances the status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StageMismatch`] if the artifact is not for the
    /// record's current stage, or if that artifact slot is already filled.
    pub fn apply_success(&mut self, artifact: StageArtifact) -> Result<StageStatus, StoreError> {
        let stage = artifact.stage();
        if self.next_stage() != Some(stage) || self.artifacts.has(stage) {
            return Err(StoreError::StageMismatch {
                id: self.id.clone(),
                status: self.stage_status,
                stage,
            });
        }

        match artifact {
            StageArtifact::Caption(caption) => self.artifacts.caption = Some(caption),
            StageArtifact::Recipe(recipe) => self.artifacts.recipe = Some(recipe),
            StageArtifact::Published(page) => self.artifacts.published = Some(page),
        }
        self.stage_status = stage.completed_status();
        self.attempts = 0;
        self.touch();
        Ok(self.stage_status)
    }

    /// Counts a failed attempt of `stage` and records the error.
    ///
    /// Returns the attempt count including this failure.
    pub fn note_failure(&mut self, stage: Stage, kind: ErrorKind, message: impl Into<String>) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(LastError {
            stage,
            kind,
            message: message.into(),
            at: Utc::now(),
        });
        self.touch();
        self.attempts
    }

    /// Moves the record to `Failed` after `stage` gave up.
    pub fn give_up(&mut self, stage: Stage) {
        self.stage_status = StageStatus::Failed;
        self.failed_stage = Some(stage);
        self.touch();
    }

    /// Sends a `Failed` record back to `Pending`.
    ///
    /// Artifacts and attempts are cleared; `last_error` is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFailed`] for records in any other status.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        if self.stage_status != StageStatus::Failed {
            return Err(StoreError::NotFailed {
                id: self.id.clone(),
                status: self.stage_status,
            });
        }
        self.stage_status = StageStatus::Pending;
        self.failed_stage = None;
        self.attempts = 0;
        self.artifacts = Artifacts::default();
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stage::{CaptionArtifact, PublishedPage};

    fn caption() -> StageArtifact {
        StageArtifact::Caption(CaptionArtifact {
            text: "Pasta with tomatoes".to_string(),
            thumbnail_url: None,
        })
    }

    // ==================== StageStatus Tests ====================

    #[test]
    fn test_stage_status_roundtrip_str() {
        for status in [
            StageStatus::Pending,
            StageStatus::CaptionFetched,
            StageStatus::Structured,
            StageStatus::Published,
            StageStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<StageStatus>().unwrap(), status);
        }
        assert!("in_progress".parse::<StageStatus>().is_err());
    }

    #[test]
    fn test_stage_status_next_stage() {
        assert_eq!(StageStatus::Pending.next_stage(), Some(Stage::Fetch));
        assert_eq!(StageStatus::CaptionFetched.next_stage(), Some(Stage::Extract));
        assert_eq!(StageStatus::Structured.next_stage(), Some(Stage::Publish));
        assert_eq!(StageStatus::Published.next_stage(), None);
        assert_eq!(StageStatus::Failed.next_stage(), None);
    }

    #[test]
    fn test_stage_status_serializes_snake_case() {
        let json = serde_json::to_string(&StageStatus::CaptionFetched).unwrap();
        assert_eq!(json, "\"caption_fetched\"");
    }

    // ==================== Record Transition Tests ====================

    #[test]
    fn test_apply_success_advances_and_resets_attempts() {
        let mut record = Record::new("abc", "https://www.instagram.com/p/abc/", 0);
        record.note_failure(Stage::Fetch, ErrorKind::Timeout, "slow");
        assert_eq!(record.attempts, 1);

        let status = record.apply_success(caption()).unwrap();

        assert_eq!(status, StageStatus::CaptionFetched);
        assert_eq!(record.attempts, 0);
        assert!(record.artifacts.caption.is_some());
        // last_error survives a later success
        assert!(record.last_error.is_some());
    }

    #[test]
    fn test_apply_success_rejects_wrong_stage() {
        let mut record = Record::new("abc", "https://www.instagram.com/p/abc/", 0);
        let page = StageArtifact::Published(PublishedPage {
            url: "https://telegra.ph/x".to_string(),
            path: "x".to_string(),
        });

        let result = record.apply_success(page);

        assert!(matches!(result, Err(StoreError::StageMismatch { .. })));
        assert_eq!(record.stage_status, StageStatus::Pending);
    }

    #[test]
    fn test_apply_success_is_write_once() {
        let mut record = Record::new("abc", "https://www.instagram.com/p/abc/", 0);
        record.apply_success(caption()).unwrap();

        let second = record.apply_success(caption());

        assert!(second.is_err());
    }

    #[test]
    fn test_give_up_and_reset() {
        let mut record = Record::new("abc", "https://www.instagram.com/p/abc/", 0);
        record.apply_success(caption()).unwrap();
        record.note_failure(Stage::Extract, ErrorKind::Schema, "no ingredients");
        record.give_up(Stage::Extract);

        assert_eq!(record.stage_status, StageStatus::Failed);
        assert_eq!(record.failed_stage, Some(Stage::Extract));

        record.reset().unwrap();

        assert_eq!(record.stage_status, StageStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert!(record.artifacts.caption.is_none());
        assert_eq!(record.last_error.as_ref().unwrap().kind, ErrorKind::Schema);
    }

    #[test]
    fn test_reset_rejects_non_failed() {
        let mut record = Record::new("abc", "https://www.instagram.com/p/abc/", 0);
        assert!(matches!(
            record.reset(),
            Err(StoreError::NotFailed { .. })
        ));
    }
}
