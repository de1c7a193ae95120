//! Pipeline orchestrator.
//!
//! Drives every record through `fetch -> extract -> publish`, one stage call
//! at a time per record, with bounded concurrency across records.
//!
//! # Concurrency Model
//!
//! - The orchestrator is the only writer of the [`RecordStore`] and the only
//!   caller of [`ProgressPersister::save`], which runs on the blocking pool.
//!   Workers receive the inputs of one stage, call the executor and report
//!   back through an mpsc channel.
//! - A record is claimed before its stage call is spawned and stays claimed
//!   while it waits out a backoff, so a record never has two active attempts.
//! - A global semaphore bounds concurrent stage calls; extract and publish
//!   have their own caps on top. Fetches are paced by a [`RoleThrottle`]
//!   before they take a global slot, so a paced fetch never holds one while
//!   it sleeps.
//! - Backoff waits are spawned timers that post a "retry due" event; they do
//!   not hold permits or block other records.
//!
//! # Cancellation
//!
//! Setting the stop flag passed to [`Pipeline::run`] halts the run: no new
//! stage call starts, pending backoff timers are dropped, and in-flight calls
//! finish and are persisted. A later run resumes from the checkpoint.

mod stats;
mod worker;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::checkpoint::{PersistError, ProgressPersister};
use crate::config::{
    DEFAULT_CONCURRENCY, DEFAULT_EXTRACT_CONCURRENCY, DEFAULT_PUBLISH_CONCURRENCY, Settings,
};
use crate::input::SourceItem;
use crate::record::{RecordStore, SeedOutcome, Stage, StageArtifact, StageStatus, StoreError};
use crate::report::{FailureEntry, OutputEntry, collect_failures, collect_outputs};
use crate::retry::{RetryDecision, RetryPolicy, Timer, TokioTimer};
use crate::stage::{StageError, StageExecutors, StageOutcome};
use crate::throttle::RoleThrottle;

pub use stats::RunStats;
use worker::{Event, HALT_POLL_INTERVAL, StageJob, WorkerContext, run_job};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Errors that end a run.
///
/// Failures of individual records are not errors; they are recorded on the
/// record and reported in the [`RunSummary`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "invalid {setting} value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency { setting: &'static str, value: usize },

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("{role} backend '{name}' is not ready: {source}")]
    BackendNotReady {
        role: Stage,
        name: &'static str,
        #[source]
        source: StageError,
    },
}

/// Concurrency and retry settings of the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub extract_concurrency: usize,
    pub publish_concurrency: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            extract_concurrency: DEFAULT_EXTRACT_CONCURRENCY,
            publish_concurrency: DEFAULT_PUBLISH_CONCURRENCY,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl From<&Settings> for PipelineSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            concurrency: settings.concurrency,
            extract_concurrency: settings.extract_concurrency,
            publish_concurrency: settings.publish_concurrency,
            retry_policy: settings.retry.clone(),
        }
    }
}

/// Counts at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub published: usize,
    pub failed: usize,
    /// Records left unfinished.
    pub pending: usize,
    /// Retries scheduled during this run.
    pub retried: usize,
    /// The stop flag ended the run with work left.
    pub interrupted: bool,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Published records in first-seen order.
    pub outputs: Vec<OutputEntry>,
    /// Failed records in first-seen order.
    pub failures: Vec<FailureEntry>,
    /// Final state of the store, identical to the last checkpoint.
    pub store: RecordStore,
}

/// Resumable fetch/extract/publish orchestrator.
pub struct Pipeline {
    executors: StageExecutors,
    persister: Arc<dyn ProgressPersister>,
    settings: PipelineSettings,
    timer: Arc<dyn Timer>,
    throttle: Arc<RoleThrottle>,
    stats: Arc<RunStats>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("executors", &self.executors)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConcurrency`] if any cap is outside
    /// 1..=100.
    #[instrument(level = "debug", skip_all)]
    pub fn new(
        executors: StageExecutors,
        persister: Arc<dyn ProgressPersister>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        for (setting, value) in [
            ("concurrency", settings.concurrency),
            ("extract_concurrency", settings.extract_concurrency),
            ("publish_concurrency", settings.publish_concurrency),
        ] {
            if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
                return Err(PipelineError::InvalidConcurrency { setting, value });
            }
        }

        debug!(
            concurrency = settings.concurrency,
            extract_concurrency = settings.extract_concurrency,
            publish_concurrency = settings.publish_concurrency,
            max_retries = settings.retry_policy.max_retries(),
            ?executors,
            "creating pipeline"
        );

        Ok(Self {
            executors,
            persister,
            settings,
            timer: Arc::new(TokioTimer),
            throttle: Arc::new(RoleThrottle::disabled()),
            stats: Arc::new(RunStats::new()),
        })
    }

    /// Replaces the timer used for backoff waits.
    #[must_use]
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Replaces the per-role request pacing.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Arc<RoleThrottle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Live counters, for progress display.
    #[must_use]
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    /// Loads the checkpoint, or starts empty when there is none.
    ///
    /// With `fresh`, an unreadable checkpoint is moved aside and an empty
    /// store is returned instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persist`] for unreadable checkpoints (unless
    /// `fresh`) and I/O failures.
    pub fn load_store(&self, fresh: bool) -> Result<RecordStore, PipelineError> {
        match self.persister.load() {
            Ok(Some(store)) => {
                info!(records = store.len(), "resuming from checkpoint");
                Ok(store)
            }
            Ok(None) => Ok(RecordStore::new()),
            Err(err) if fresh && err.is_unreadable_checkpoint() => {
                let moved = self.persister.set_aside()?;
                warn!(
                    error = %err,
                    moved_to = ?moved,
                    "unreadable checkpoint set aside, starting fresh"
                );
                Ok(RecordStore::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Probes every backend once.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BackendNotReady`] for the first backend that
    /// fails its probe.
    pub async fn check_backends(&self) -> Result<(), PipelineError> {
        let not_ready = |role: Stage, name: &'static str, source: StageError| {
            PipelineError::BackendNotReady { role, name, source }
        };
        let fetcher = &self.executors.fetcher;
        fetcher
            .check_ready()
            .await
            .map_err(|e| not_ready(Stage::Fetch, fetcher.name(), e))?;
        let extractor = &self.executors.extractor;
        extractor
            .check_ready()
            .await
            .map_err(|e| not_ready(Stage::Extract, extractor.name(), e))?;
        let publisher = &self.executors.publisher;
        publisher
            .check_ready()
            .await
            .map_err(|e| not_ready(Stage::Publish, publisher.name(), e))?;
        info!("all backends ready");
        Ok(())
    }

    /// Seeds `store` with `items` and processes every unfinished record.
    ///
    /// The store is persisted after seeding and after every stage outcome.
    /// Returns when every record is terminal, when `stop` is set and
    /// in-flight calls have drained, or on a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persist`] when a checkpoint write fails (the
    /// run stops claiming work and drains in-flight calls first) and
    /// [`PipelineError::Store`] when a record's state is inconsistent.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn run(
        &self,
        mut store: RecordStore,
        items: &[SourceItem],
        stop: Arc<AtomicBool>,
    ) -> Result<RunReport, PipelineError> {
        let mut created = 0usize;
        for item in items {
            if store.seed(item) == SeedOutcome::Created {
                created += 1;
            }
        }
        self.persist(&store).await?;

        let counts = store.count_by_status();
        self.stats
            .reset(counts.total(), counts.published, counts.failed);
        info!(
            total = counts.total(),
            new = created,
            published = counts.published,
            failed = counts.failed,
            unfinished = counts.unfinished(),
            "starting pipeline run"
        );

        let ctx = Arc::new(WorkerContext {
            executors: self.executors.clone(),
            global: Semaphore::new(self.settings.concurrency),
            extract: Semaphore::new(self.settings.extract_concurrency),
            publish: Semaphore::new(self.settings.publish_concurrency),
            throttle: Arc::clone(&self.throttle),
            stats: Arc::clone(&self.stats),
            halt: AtomicBool::new(false),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut run = RunState {
            ready: store.pending_ids().into(),
            ..RunState::default()
        };

        loop {
            if !run.halting
                && let Err(err) = self.dispatch_ready(&store, &mut run, &ctx, &tx)
            {
                run.fail(err, &ctx);
            }
            if run.claimed.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if let Err(err) = self.handle_event(event, &mut store, &mut run, &tx).await {
                        run.fail(err, &ctx);
                    }
                }
                () = tokio::time::sleep(HALT_POLL_INTERVAL) => {}
            }

            if !run.halting && stop.load(Ordering::SeqCst) {
                info!(
                    in_flight = self.stats.in_flight(),
                    waiting = run.backoffs.len(),
                    "stop requested, draining in-flight stage calls"
                );
                run.halting = true;
                run.stopped = true;
                ctx.halt();
                run.drop_backoffs();
            }
        }

        if let Some(err) = run.fatal {
            error!(error = %err, "pipeline run aborted");
            return Err(err);
        }

        let counts = store.count_by_status();
        let summary = RunSummary {
            published: counts.published,
            failed: counts.failed,
            pending: counts.unfinished(),
            retried: self.stats.retried(),
            interrupted: run.stopped && counts.unfinished() > 0,
        };
        info!(
            published = summary.published,
            failed = summary.failed,
            pending = summary.pending,
            retried = summary.retried,
            interrupted = summary.interrupted,
            "pipeline run finished"
        );

        Ok(RunReport {
            summary,
            outputs: collect_outputs(&store),
            failures: collect_failures(&store),
            store,
        })
    }

    /// Writes a snapshot of `store` on the blocking pool.
    ///
    /// Saves are awaited one at a time, so snapshots land in order.
    async fn persist(&self, store: &RecordStore) -> Result<(), PersistError> {
        let persister = Arc::clone(&self.persister);
        let snapshot = store.clone();
        tokio::task::spawn_blocking(move || persister.save(&snapshot)).await?
    }

    /// Claims and spawns every ready record.
    fn dispatch_ready(
        &self,
        store: &RecordStore,
        run: &mut RunState,
        ctx: &Arc<WorkerContext>,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<(), PipelineError> {
        while let Some(id) = run.ready.pop_front() {
            if run.claimed.contains(&id) {
                continue;
            }
            let record = store
                .get(&id)
                .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
            let Some(job) = StageJob::for_record(record)? else {
                continue;
            };

            debug!(id = %id, stage = %job.stage, "dispatching stage");
            run.claimed.insert(id);
            tokio::spawn(run_job(job, Arc::clone(ctx), tx.clone()));
        }
        Ok(())
    }

    async fn handle_event(
        &self,
        event: Event,
        store: &mut RecordStore,
        run: &mut RunState,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<(), PipelineError> {
        match event {
            Event::Released(id) => {
                run.claimed.remove(&id);
                Ok(())
            }
            Event::RetryDue(id) => {
                if run.backoffs.remove(&id).is_some() {
                    run.claimed.remove(&id);
                    run.ready.push_back(id);
                }
                Ok(())
            }
            Event::Finished { id, stage, result } => {
                let retry = match self.apply_result(store, &id, stage, result) {
                    Ok(retry) => retry,
                    Err(err) => {
                        run.claimed.remove(&id);
                        return Err(err);
                    }
                };
                match retry {
                    Some(delay) if !run.halting => {
                        let timer = Arc::clone(&self.timer);
                        let tx = tx.clone();
                        let due = id.clone();
                        let handle = tokio::spawn(async move {
                            timer.sleep(delay).await;
                            let _ = tx.send(Event::RetryDue(due));
                        });
                        run.backoffs.insert(id, handle);
                    }
                    Some(_) => {
                        run.claimed.remove(&id);
                    }
                    None => {
                        run.claimed.remove(&id);
                        if store.get(&id).is_some_and(|record| !record.is_terminal()) {
                            run.ready.push_back(id);
                        }
                    }
                }

                if run.fatal.is_none() {
                    self.persist(store).await?;
                }
                Ok(())
            }
        }
    }

    /// Applies one stage result to its record.
    ///
    /// Returns the backoff delay when the stage should run again.
    #[instrument(level = "debug", skip(self, store, result), fields(id = %id, stage = %stage))]
    fn apply_result(
        &self,
        store: &mut RecordStore,
        id: &str,
        stage: Stage,
        result: Result<StageArtifact, StageError>,
    ) -> Result<Option<std::time::Duration>, PipelineError> {
        let record = store
            .get_mut(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;

        let error = match result {
            Ok(artifact) => {
                let status = record.apply_success(artifact)?;
                info!(id, status = %status, "stage completed");
                if status == StageStatus::Published {
                    self.stats.increment_published();
                }
                return Ok(None);
            }
            Err(error) => error,
        };

        let outcome = StageOutcome::from_error(&error);
        let Some(info) = outcome.failure() else {
            return Ok(None);
        };
        let attempts = record.note_failure(stage, info.kind, &info.message);
        if let Some(delay) = info.retry_after {
            self.throttle.record_rate_limit(stage, delay);
        }

        match self.settings.retry_policy.decide(attempts, &outcome) {
            RetryDecision::RetryAfter { delay } => {
                self.stats.increment_retried();
                warn!(
                    id,
                    attempts,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "stage failed, will retry"
                );
                Ok(Some(delay))
            }
            RetryDecision::GiveUp { reason } => {
                record.give_up(stage);
                self.stats.increment_failed();
                warn!(id, attempts, error = %error, reason = %reason, "stage failed, giving up");
                Ok(None)
            }
            RetryDecision::Proceed => Ok(None),
        }
    }
}

/// Mutable bookkeeping of one `run` call.
#[derive(Default)]
struct RunState {
    /// Records waiting to be dispatched.
    ready: VecDeque<String>,
    /// Records with a stage call in flight or a backoff pending.
    claimed: HashSet<String>,
    backoffs: HashMap<String, JoinHandle<()>>,
    /// No new stage calls start.
    halting: bool,
    /// The stop flag was observed.
    stopped: bool,
    fatal: Option<PipelineError>,
}

impl RunState {
    fn fail(&mut self, err: PipelineError, ctx: &WorkerContext) {
        error!(error = %err, "fatal pipeline error, draining in-flight stage calls");
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        self.halting = true;
        ctx.halt();
        self.drop_backoffs();
    }

    /// Cancels backoff timers and releases their claims.
    fn drop_backoffs(&mut self) {
        for (id, handle) in self.backoffs.drain() {
            handle.abort();
            self.claimed.remove(&id);
        }
    }
}
