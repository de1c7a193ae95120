//! One stage call, run on its own task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit, mpsc};
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::stats::RunStats;
use crate::record::{Record, Stage, StageArtifact, StoreError};
use crate::stage::{CaptionArtifact, Recipe, SourceRef, StageError, StageExecutors};
use crate::throttle::RoleThrottle;

/// How often a waiting worker checks whether the run is halting.
pub(super) const HALT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Messages from workers and backoff timers to the orchestrator.
#[derive(Debug)]
pub(super) enum Event {
    /// A stage call returned.
    Finished {
        id: String,
        stage: Stage,
        result: Result<StageArtifact, StageError>,
    },
    /// The worker gave up its claim without calling the executor.
    Released(String),
    /// A backoff wait elapsed.
    RetryDue(String),
}

/// Inputs of the next stage of one record.
#[derive(Debug, Clone)]
pub(super) enum StageInput {
    Fetch(SourceRef),
    Extract {
        caption: CaptionArtifact,
        source_url: String,
    },
    Publish(Box<Recipe>),
}

#[derive(Debug, Clone)]
pub(super) struct StageJob {
    pub(super) id: String,
    pub(super) stage: Stage,
    pub(super) input: StageInput,
}

impl StageJob {
    /// Builds the job for the record's next stage.
    ///
    /// Returns `Ok(None)` for terminal records and
    /// [`StoreError::StageMismatch`] when the artifact the stage needs is
    /// missing.
    pub(super) fn for_record(record: &Record) -> Result<Option<Self>, StoreError> {
        let Some(stage) = record.next_stage() else {
            return Ok(None);
        };
        let missing = || StoreError::StageMismatch {
            id: record.id.clone(),
            status: record.stage_status,
            stage,
        };

        let input = match stage {
            Stage::Fetch => StageInput::Fetch(SourceRef::from(record)),
            Stage::Extract => StageInput::Extract {
                caption: record.artifacts.caption.clone().ok_or_else(missing)?,
                source_url: record.source_url.clone(),
            },
            Stage::Publish => {
                StageInput::Publish(Box::new(record.artifacts.recipe.clone().ok_or_else(missing)?))
            }
        };
        Ok(Some(Self {
            id: record.id.clone(),
            stage,
            input,
        }))
    }
}

/// Shared state of the workers of one run.
pub(super) struct WorkerContext {
    pub(super) executors: StageExecutors,
    pub(super) global: Semaphore,
    pub(super) extract: Semaphore,
    pub(super) publish: Semaphore,
    pub(super) throttle: Arc<RoleThrottle>,
    pub(super) stats: Arc<RunStats>,
    pub(super) halt: AtomicBool,
}

impl WorkerContext {
    /// Stops new stage calls; waiting workers release their claims.
    pub(super) fn halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
        self.global.close();
        self.extract.close();
        self.publish.close();
    }

    fn is_halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    fn role_semaphore(&self, stage: Stage) -> Option<&Semaphore> {
        match stage {
            Stage::Fetch => None,
            Stage::Extract => Some(&self.extract),
            Stage::Publish => Some(&self.publish),
        }
    }

    async fn wait_for_halt(&self) {
        while !self.is_halted() {
            tokio::time::sleep(HALT_POLL_INTERVAL).await;
        }
    }
}

/// Acquires permits, paces, runs the stage and reports the result.
///
/// Exactly one event is sent per job.
#[instrument(skip_all, fields(id = %job.id, stage = %job.stage))]
pub(super) async fn run_job(job: StageJob, ctx: Arc<WorkerContext>, tx: mpsc::UnboundedSender<Event>) {
    let event = match execute(&job, &ctx).await {
        Some(result) => Event::Finished {
            id: job.id,
            stage: job.stage,
            result,
        },
        None => {
            debug!("halted before the stage call, releasing claim");
            Event::Released(job.id)
        }
    };
    // The receiver outlives every worker; a send error means the run is gone.
    let _ = tx.send(event);
}

async fn execute(job: &StageJob, ctx: &WorkerContext) -> Option<Result<StageArtifact, StageError>> {
    // Role permit first so a queue of extract jobs does not pin global slots.
    let _role: Option<SemaphorePermit<'_>> = match ctx.role_semaphore(job.stage) {
        Some(semaphore) => Some(semaphore.acquire().await.ok()?),
        None => None,
    };

    // Pace before taking a global slot so a sleeping fetch leaves the slot
    // to ready work of other stages.
    let turn = tokio::select! {
        biased;
        () = ctx.wait_for_halt() => return None,
        turn = ctx.throttle.acquire(job.stage) => turn,
    };
    let _global = tokio::select! {
        biased;
        () = ctx.wait_for_halt() => return None,
        permit = ctx.global.acquire() => permit.ok()?,
    };
    if ctx.is_halted() {
        return None;
    }
    turn.start();

    ctx.stats.start_call();
    let executors = &ctx.executors;
    let result = match &job.input {
        StageInput::Fetch(source) => executors
            .fetcher
            .fetch(source)
            .await
            .map(StageArtifact::Caption),
        StageInput::Extract {
            caption,
            source_url,
        } => {
            let started = Instant::now();
            executors
                .extractor
                .extract(caption, source_url)
                .await
                .map(|mut recipe| {
                    recipe.processing_ms = Some(elapsed_ms(started));
                    StageArtifact::Recipe(recipe)
                })
        }
        StageInput::Publish(recipe) => executors
            .publisher
            .publish(recipe)
            .await
            .map(StageArtifact::Published),
    };
    ctx.stats.finish_call();
    Some(result)
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
