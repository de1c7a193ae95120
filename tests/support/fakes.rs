//! Scripted stage executors, persisters and timers for orchestrator tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use recipe_pipeline_core::record::Stage;
use recipe_pipeline_core::stage::{
    CaptionArtifact, PublishedPage, Recipe, SourceRef, parse_model_output,
};
use recipe_pipeline_core::{
    CaptionFetcher, PersistError, ProgressPersister, RecipeExtractor, RecipePublisher,
    RecordStore, SourceItem, StageError, StageExecutors, Timer,
};

pub fn post_url(id: &str) -> String {
    format!("https://www.instagram.com/p/{id}/")
}

pub fn item(id: &str) -> SourceItem {
    SourceItem {
        id: id.to_string(),
        url: post_url(id),
        caption: None,
    }
}

pub fn items(ids: &[&str]) -> Vec<SourceItem> {
    ids.iter().map(|id| item(id)).collect()
}

fn id_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// What a scripted stage call returns.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Ok,
    /// Retryable failure (service unavailable).
    Transient,
    /// Non-retryable failure (request rejected).
    Permanent,
    /// Retryable failure carrying a server delay.
    RateLimited(Duration),
}

#[derive(Default)]
struct Concurrency {
    current: usize,
    max: usize,
}

/// One fake backing all three stage roles.
///
/// Unscripted calls succeed. Tracks every call, whether a record ever had
/// two calls in flight, and the peak concurrency per stage.
#[derive(Default)]
pub struct FakeBackends {
    scripts: Mutex<HashMap<(Stage, String), VecDeque<Step>>>,
    calls: Mutex<Vec<(Stage, String)>>,
    active: Mutex<HashSet<String>>,
    overlapped: AtomicBool,
    per_stage: Mutex<HashMap<Stage, Concurrency>>,
    overall: Mutex<Concurrency>,
    latency: Duration,
    stop_on: Mutex<Option<(Stage, String, Arc<AtomicBool>)>>,
}

impl FakeBackends {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn script(&self, stage: Stage, id: &str, steps: &[Step]) {
        self.scripts
            .lock()
            .unwrap()
            .insert((stage, id.to_string()), steps.iter().copied().collect());
    }

    /// Sets `flag` when `stage` is called for `id`.
    pub fn stop_on(&self, stage: Stage, id: &str, flag: Arc<AtomicBool>) {
        *self.stop_on.lock().unwrap() = Some((stage, id.to_string(), flag));
    }

    pub fn calls(&self, stage: Stage, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, i)| *s == stage && i == id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn peak(&self, stage: Stage) -> usize {
        self.per_stage
            .lock()
            .unwrap()
            .get(&stage)
            .map_or(0, |c| c.max)
    }

    pub fn peak_overall(&self) -> usize {
        self.overall.lock().unwrap().max
    }

    pub fn executors(self: &Arc<Self>) -> StageExecutors {
        StageExecutors {
            fetcher: self.clone(),
            extractor: self.clone(),
            publisher: self.clone(),
        }
    }

    async fn step(&self, stage: Stage, id: &str) -> Result<(), StageError> {
        {
            if !self.active.lock().unwrap().insert(id.to_string()) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.calls.lock().unwrap().push((stage, id.to_string()));
            let mut per_stage = self.per_stage.lock().unwrap();
            let entry = per_stage.entry(stage).or_default();
            entry.current += 1;
            entry.max = entry.max.max(entry.current);
            let mut overall = self.overall.lock().unwrap();
            overall.current += 1;
            overall.max = overall.max.max(overall.current);
        }
        if let Some((s, i, flag)) = self.stop_on.lock().unwrap().as_ref()
            && *s == stage
            && i == id
        {
            flag.store(true, Ordering::SeqCst);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(stage, id.to_string()))
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Ok);

        {
            self.active.lock().unwrap().remove(id);
            if let Some(entry) = self.per_stage.lock().unwrap().get_mut(&stage) {
                entry.current -= 1;
            }
            self.overall.lock().unwrap().current -= 1;
        }

        let service = stage.as_str().to_string();
        match step {
            Step::Ok => Ok(()),
            Step::Transient => Err(StageError::Unavailable {
                service,
                message: "scripted outage".to_string(),
            }),
            Step::Permanent => Err(StageError::Rejected {
                service,
                message: "scripted rejection".to_string(),
            }),
            Step::RateLimited(delay) => Err(StageError::RateLimited {
                service,
                retry_after: Some(delay),
            }),
        }
    }
}

#[async_trait]
impl CaptionFetcher for FakeBackends {
    fn name(&self) -> &'static str {
        "fake-fetch"
    }

    async fn fetch(&self, source: &SourceRef) -> Result<CaptionArtifact, StageError> {
        self.step(Stage::Fetch, &source.id).await?;
        Ok(CaptionArtifact {
            text: format!("caption of {}", source.id),
            thumbnail_url: None,
        })
    }
}

#[async_trait]
impl RecipeExtractor for FakeBackends {
    fn name(&self) -> &'static str {
        "fake-extract"
    }

    async fn extract(&self, caption: &CaptionArtifact, source_url: &str) -> Result<Recipe, StageError> {
        let id = id_from_url(source_url);
        assert_eq!(caption.text, format!("caption of {id}"));
        self.step(Stage::Extract, &id).await?;
        let mut recipe = parse_model_output(
            &format!(r#"{{"title": "{id}", "ingredients": [{{"ingredients": [{{"name": "salt"}}]}}]}}"#),
            "fake",
        )?;
        recipe.source_url = Some(source_url.to_string());
        Ok(recipe)
    }
}

#[async_trait]
impl RecipePublisher for FakeBackends {
    fn name(&self) -> &'static str {
        "fake-publish"
    }

    async fn publish(&self, recipe: &Recipe) -> Result<PublishedPage, StageError> {
        self.step(Stage::Publish, &recipe.title).await?;
        Ok(PublishedPage {
            url: format!("https://pages.test/{}", recipe.title),
            path: recipe.title.clone(),
        })
    }
}

/// Keeps every saved snapshot in memory.
#[derive(Default)]
pub struct RecordingPersister {
    snapshots: Mutex<Vec<RecordStore>>,
    /// Saves beyond this count fail.
    fail_after: Option<usize>,
}

impl RecordingPersister {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_after(saves: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_after: Some(saves),
            ..Self::default()
        })
    }

    pub fn snapshots(&self) -> Vec<RecordStore> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}

impl ProgressPersister for RecordingPersister {
    fn load(&self) -> Result<Option<RecordStore>, PersistError> {
        Ok(self.snapshots.lock().unwrap().last().cloned())
    }

    fn save(&self, store: &RecordStore) -> Result<(), PersistError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        if self.fail_after.is_some_and(|limit| snapshots.len() >= limit) {
            return Err(PersistError::Io {
                path: PathBuf::from("memory"),
                source: io::Error::other("disk full"),
            });
        }
        snapshots.push(store.clone());
        Ok(())
    }
}

/// Records requested backoff delays and returns at once.
#[derive(Default)]
pub struct InstantTimer {
    delays: Mutex<Vec<Duration>>,
}

impl InstantTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Timer for InstantTimer {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}
