//! Merging of command-line arguments and the config file.
//!
//! Command-line values win over file values, but only when they were actually
//! given on the command line; clap defaults never override the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};
use recipe_pipeline_core::config::{FileConfig, resolve_default_config_path};
use tracing::debug;

use crate::cli::Args;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) concurrency: bool,
    pub(crate) max_retries: bool,
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = sources_from_matches(&matches);
    (args, sources)
}

fn sources_from_matches(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        concurrency: is_commandline_value(matches, "concurrency"),
        max_retries: is_commandline_value(matches, "max_retries"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Where the config file is read from, if anywhere.
#[derive(Debug, Clone)]
pub(crate) struct ConfigSource {
    pub(crate) path: Option<PathBuf>,
    pub(crate) loaded: bool,
}

/// Loads `--config`, or the default config file when it exists.
///
/// An explicit `--config` path must exist.
pub(crate) fn load_file_config(args: &Args) -> Result<(FileConfig, ConfigSource)> {
    if let Some(path) = &args.config {
        let cfg = FileConfig::load(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?;
        return Ok((
            cfg,
            ConfigSource {
                path: Some(path.clone()),
                loaded: true,
            },
        ));
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(default_path) if default_path.exists() => {
            let cfg = FileConfig::load(default_path).with_context(|| {
                format!("Failed to load config file '{}'", default_path.display())
            })?;
            Ok((cfg, ConfigSource { path, loaded: true }))
        }
        _ => Ok((FileConfig::default(), ConfigSource { path, loaded: false })),
    }
}

/// Overlays command-line values on the file configuration.
pub(crate) fn apply_cli_overrides(
    mut cfg: FileConfig,
    args: &Args,
    sources: &CliValueSources,
) -> FileConfig {
    if let Some(input) = &args.input {
        cfg.input = Some(input.clone());
    }
    if let Some(collection) = &args.collection {
        cfg.collection = Some(collection.clone());
    }
    if let Some(checkpoint) = &args.checkpoint {
        cfg.checkpoint = Some(checkpoint.clone());
    }
    if let Some(output) = &args.output {
        cfg.output = Some(output.clone());
    }
    if let Some(failure_log) = &args.failure_log {
        cfg.failure_log = Some(failure_log.clone());
    }
    if let Some(extractor) = &args.extractor {
        cfg.extractor = Some(extractor.clone());
    }
    if let Some(fetcher) = &args.fetcher {
        cfg.fetcher = Some(fetcher.clone());
    }
    if sources.concurrency || cfg.concurrency.is_none() {
        cfg.concurrency = Some(u64::from(args.concurrency));
    }
    if sources.max_retries || cfg.max_retries.is_none() {
        cfg.max_retries = Some(u64::from(args.max_retries));
    }
    debug!(?cfg, "effective configuration");
    cfg
}

/// Priority: `RUST_LOG` > `-q` > `-v` > info.
pub(crate) fn resolve_default_log_level(args: &Args) -> &'static str {
    if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
