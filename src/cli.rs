//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use recipe_pipeline_core::DEFAULT_MAX_RETRIES;
use recipe_pipeline_core::config::DEFAULT_CONCURRENCY;

/// Turn saved Instagram recipe posts into published recipe pages.
///
/// Fetches each post's caption, extracts a structured recipe with a language
/// model and publishes it as a page. Progress is checkpointed after every
/// step; rerun the same command to resume.
#[derive(Parser, Debug)]
#[command(name = "recipe-pipeline")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/recipe-pipeline/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Input collection: Instagram saved_collections.json or a JSON list of {"url": ...}
    #[arg(short = 'i', long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Only process posts of this saved collection
    #[arg(long, value_name = "NAME")]
    pub collection: Option<String>,

    /// Checkpoint file
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Output collection of published recipes
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Failure log
    #[arg(long, value_name = "PATH")]
    pub failure_log: Option<PathBuf>,

    /// Extract backend
    #[arg(long, value_parser = ["ollama", "lmstudio", "gemini"])]
    pub extractor: Option<String>,

    /// Caption source: the post page or the caption carried by the input
    #[arg(long, value_parser = ["http", "inline"])]
    pub fetcher: Option<String>,

    /// Maximum records worked on at once (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Attempts per stage for transient failures (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Start over when the checkpoint is unreadable (the old file is kept aside)
    #[arg(long)]
    pub fresh: bool,

    /// Send a failed record back to pending (repeatable)
    #[arg(long, value_name = "ID")]
    pub reset: Vec<String>,

    /// Send every failed record back to pending
    #[arg(long)]
    pub reset_failed: bool,

    /// Print checkpoint counts and exit
    #[arg(long)]
    pub status: bool,
}
