use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use recipe_pipeline_core::config::{DEFAULT_CHECKPOINT_PATH, FetcherKind};
use recipe_pipeline_core::{
    CheckpointFile, FileConfig, Pipeline, PipelineSettings, ProgressPersister, RecordStore,
    RoleThrottle, Settings, Stage, build_executors, load_input, write_reports,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{config_runtime, exit_handler, progress_manager, summary, terminal};
use crate::cli::Args;

pub(crate) async fn run_pipeline() -> Result<ProcessExit> {
    let (args, cli_sources) = config_runtime::parse_cli_with_sources();

    let default_level = config_runtime::resolve_default_log_level(&args);
    terminal::init_tracing(default_level, terminal::is_no_color_requested());
    debug!(?args, "CLI arguments parsed");

    let (file_config, config_source) = config_runtime::load_file_config(&args)?;
    if config_source.loaded {
        debug!(path = ?config_source.path, "config file loaded");
    }
    let file_config = config_runtime::apply_cli_overrides(file_config, &args, &cli_sources);

    let checkpoint = CheckpointFile::new(checkpoint_path(&file_config));

    if args.status {
        return show_status(&checkpoint);
    }

    if !args.reset.is_empty() || args.reset_failed {
        apply_resets(&checkpoint, &args)?;
        if file_config.input.is_none() {
            return Ok(ProcessExit::Success);
        }
    }

    let settings = Settings::resolve(&file_config)?;
    let input_path = settings.require_input()?;
    let items = load_input(input_path, settings.collection.as_deref())
        .with_context(|| format!("Failed to load input '{}'", input_path.display()))?;
    info!(
        items = items.len(),
        input = %input_path.display(),
        collection = settings.collection.as_deref().unwrap_or("<all>"),
        "Input loaded"
    );

    let executors = build_executors(&settings)?;
    let persister: Arc<dyn ProgressPersister> =
        Arc::new(CheckpointFile::new(settings.checkpoint.clone()));
    let pipeline = Pipeline::new(executors, persister, PipelineSettings::from(&settings))?
        .with_throttle(Arc::new(build_throttle(&settings)));

    pipeline.check_backends().await?;
    let store = pipeline.load_store(args.fresh)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_spinner, pipeline.stats());

    let result = pipeline.run(store, &items, Arc::clone(&interrupted)).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let report = result?;
    write_reports(&report.store, &settings.output, &settings.failure_log)?;

    let run_summary = report.summary;
    info!(
        published = run_summary.published,
        failed = run_summary.failed,
        pending = run_summary.pending,
        retried = run_summary.retried,
        output = %settings.output.display(),
        failure_log = %settings.failure_log.display(),
        "Run complete"
    );
    println!("{}", summary::render_run_summary_line(&run_summary));
    summary::print_lines(&summary::render_failure_summary_lines(
        &report.failures,
        summary::terminal_width(),
    ));

    if run_summary.interrupted {
        warn!(
            pending = run_summary.pending,
            "Interrupted. Run again to resume."
        );
    }

    Ok(exit_handler::determine_exit_outcome(
        run_summary.published,
        run_summary.failed,
        run_summary.interrupted,
    ))
}

fn checkpoint_path(file_config: &FileConfig) -> PathBuf {
    file_config
        .checkpoint
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH))
}

/// Only the post-page fetcher talks to Instagram, so only it is paced.
fn build_throttle(settings: &Settings) -> RoleThrottle {
    match settings.fetcher {
        FetcherKind::Http => {
            RoleThrottle::new().with_role(Stage::Fetch, settings.fetch_delay, settings.fetch_jitter)
        }
        FetcherKind::Inline => RoleThrottle::new(),
    }
}

fn load_existing(checkpoint: &CheckpointFile) -> Result<RecordStore> {
    let store = checkpoint.load().with_context(|| {
        format!("Failed to read checkpoint '{}'", checkpoint.path().display())
    })?;
    Ok(store.unwrap_or_default())
}

fn show_status(checkpoint: &CheckpointFile) -> Result<ProcessExit> {
    let store = load_existing(checkpoint)?;
    let counts = store.count_by_status();
    summary::print_lines(&summary::render_status_lines(checkpoint.path(), &counts));
    Ok(ProcessExit::Success)
}

fn apply_resets(checkpoint: &CheckpointFile, args: &Args) -> Result<()> {
    let mut store = load_existing(checkpoint)?;
    let mut reset = 0usize;
    for id in &args.reset {
        store.reset_failed(id)?;
        reset += 1;
    }
    if args.reset_failed {
        reset += store.reset_all_failed();
    }
    checkpoint.save(&store).with_context(|| {
        format!("Failed to write checkpoint '{}'", checkpoint.path().display())
    })?;
    info!(reset, checkpoint = %checkpoint.path().display(), "Failed records reset to pending");
    println!("Reset {reset} record(s) to pending");
    Ok(())
}
