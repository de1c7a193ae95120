//! Stage executors: fetch, extract and publish.
//!
//! Each role is an object-safe async trait so the orchestrator can hold any
//! backend behind `Arc<dyn ...>`. Executors are stateless with respect to the
//! record store: they receive the inputs of one stage and return its artifact
//! or a [`StageError`]. The orchestrator turns that result into a
//! [`StageOutcome`] with [`StageOutcome::from_error`].

mod caption;
mod error;
pub mod extract;
mod fetch;
pub mod http;
mod publish;
mod recipe;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::record::{ErrorKind, Record};

pub use caption::{CaptionArtifact, caption_from_page, clean_caption};
pub use error::{FailureType, StageError, classify_error};
pub use extract::{GeminiExtractor, LmStudioExtractor, OllamaExtractor};
pub use fetch::{HttpCaptionFetcher, InlineCaptionFetcher};
pub use publish::{
    DEFAULT_AUTHOR_NAME, DEFAULT_TELEGRAPH_URL, PublishedPage, TelegraphPublisher, page_nodes,
};
pub use recipe::{Ingredient, IngredientGroup, Nutrition, Recipe, parse_model_output, recipe_json_schema};

/// What the fetch stage needs to know about a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub id: String,
    pub url: String,
    pub inline_caption: Option<String>,
}

impl From<&Record> for SourceRef {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            url: record.source_url.clone(),
            inline_caption: record.inline_caption.clone(),
        }
    }
}

/// Obtains the caption of a post.
#[async_trait]
pub trait CaptionFetcher: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Startup probe; the default assumes the backend is ready.
    async fn check_ready(&self) -> Result<(), StageError> {
        Ok(())
    }

    async fn fetch(&self, source: &SourceRef) -> Result<CaptionArtifact, StageError>;
}

/// Turns a caption into a structured recipe.
#[async_trait]
pub trait RecipeExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check_ready(&self) -> Result<(), StageError> {
        Ok(())
    }

    async fn extract(&self, caption: &CaptionArtifact, source_url: &str) -> Result<Recipe, StageError>;
}

/// Publishes a recipe and returns its public URL.
#[async_trait]
pub trait RecipePublisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check_ready(&self) -> Result<(), StageError> {
        Ok(())
    }

    async fn publish(&self, recipe: &Recipe) -> Result<PublishedPage, StageError>;
}

/// The three executors a pipeline run uses.
#[derive(Clone)]
pub struct StageExecutors {
    pub fetcher: Arc<dyn CaptionFetcher>,
    pub extractor: Arc<dyn RecipeExtractor>,
    pub publisher: Arc<dyn RecipePublisher>,
}

impl std::fmt::Debug for StageExecutors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutors")
            .field("fetcher", &self.fetcher.name())
            .field("extractor", &self.extractor.name())
            .field("publisher", &self.publisher.name())
            .finish()
    }
}

/// Details of a failed stage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Delay the backend asked for before the next attempt.
    pub retry_after: Option<Duration>,
}

impl FailureInfo {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }
}

/// Result of one stage call as seen by the retry controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    TransientFailure(FailureInfo),
    PermanentFailure(FailureInfo),
}

impl StageOutcome {
    /// Classifies an executor error.
    #[must_use]
    pub fn from_error(error: &StageError) -> Self {
        let info = FailureInfo {
            kind: error.kind(),
            message: error.to_string(),
            retry_after: error.retry_after(),
        };
        if classify_error(error).is_retryable() {
            Self::TransientFailure(info)
        } else {
            Self::PermanentFailure(info)
        }
    }

    /// Failure details, if this is a failure.
    #[must_use]
    pub fn failure(&self) -> Option<&FailureInfo> {
        match self {
            Self::Success => None,
            Self::TransientFailure(info) | Self::PermanentFailure(info) => Some(info),
        }
    }
}
