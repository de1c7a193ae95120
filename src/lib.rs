//! Recipe Pipeline Core Library
//!
//! A resumable processing pipeline that turns saved social-media posts into
//! structured recipes with public URLs. Each post moves through three stages
//! (fetch the caption, extract a recipe, publish a page) and its progress is
//! checkpointed after every stage outcome, so an interrupted run picks up
//! where it stopped.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`record`] - Per-item records and the in-memory record store
//! - [`checkpoint`] - Durable, atomically replaced checkpoint file
//! - [`stage`] - Stage executor traits and the HTTP/LLM backends
//! - [`retry`] - Retry decisions with exponential backoff
//! - [`throttle`] - Per-role request pacing
//! - [`pipeline`] - The orchestrator
//! - [`input`] - Input collection loading
//! - [`config`] - Configuration file and resolved settings
//! - [`backends`] - Executor construction from settings
//! - [`report`] - Output collection and failure log

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backends;
pub mod checkpoint;
pub mod config;
pub mod input;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod retry;
pub mod stage;
pub mod throttle;

// Re-export commonly used types
pub use backends::build_executors;
pub use checkpoint::{CheckpointFile, PersistError, ProgressPersister};
pub use config::{ConfigError, FileConfig, Settings};
pub use input::{InputError, SourceItem, load_input};
pub use pipeline::{Pipeline, PipelineError, PipelineSettings, RunReport, RunStats, RunSummary};
pub use record::{Record, RecordStore, Stage, StageStatus, StoreError};
pub use report::write_reports;
pub use retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy, Timer, TokioTimer};
pub use stage::{
    CaptionFetcher, FailureType, RecipeExtractor, RecipePublisher, StageError, StageExecutors,
    StageOutcome, classify_error,
};
pub use throttle::RoleThrottle;
