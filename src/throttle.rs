//! Per-role pacing for backend requests.
//!
//! [`RoleThrottle`] enforces a minimum spacing between consecutive calls of
//! the same stage role (fetch, extract, publish), plus optional random
//! jitter. Roles are independent: a slow fetch pace never delays publishing.
//! A server-mandated pause recorded with [`RoleThrottle::record_rate_limit`]
//! holds back every later call of that role until it expires.
//!
//! Waiting for a turn and starting it are separate steps. [`RoleThrottle::acquire`]
//! resolves once the role may call again and hands out a [`RoleTurn`]; the
//! spacing clock only advances when the caller actually starts the call with
//! [`RoleTurn::start`]. A turn dropped before it starts leaves no trace.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use recipe_pipeline_core::record::Stage;
//! use recipe_pipeline_core::throttle::RoleThrottle;
//!
//! # async fn example() {
//! let throttle = RoleThrottle::new()
//!     .with_role(Stage::Fetch, Duration::from_secs(5), Duration::from_secs(5));
//!
//! // First fetch proceeds immediately, the second waits 5-10 seconds.
//! throttle.acquire(Stage::Fetch).await.start();
//! throttle.acquire(Stage::Fetch).await.start();
//!
//! // Publishing is not paced.
//! throttle.acquire(Stage::Publish).await.start();
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::record::Stage;

/// Warning threshold for cumulative delay per role (5 minutes).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(300);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Spacing rule for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pace {
    min_delay: Duration,
    jitter: Duration,
}

/// Per-role request pacing.
///
/// Meant to be shared behind `Arc` across worker tasks. Per-role state lives
/// in a `DashMap`. The timing fields sit behind a plain mutex that is never
/// held across an await, so recording a server pause never waits on a
/// sleeping caller. Paced roles additionally hand out turns one at a time
/// through an async gate, which keeps two waiters from starting together.
#[derive(Debug, Default)]
pub struct RoleThrottle {
    paces: HashMap<Stage, Pace>,
    roles: DashMap<Stage, Arc<RoleState>>,
}

#[derive(Debug, Default)]
struct RoleState {
    timing: Mutex<RoleTiming>,
    gate: Arc<tokio::sync::Mutex<()>>,
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct RoleTiming {
    /// Earliest start of the next paced call; `None` before the first call.
    next_free: Option<Instant>,
    /// Set by a server-mandated pause.
    blocked_until: Option<Instant>,
}

impl RoleState {
    fn timing(&self) -> MutexGuard<'_, RoleTiming> {
        self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Instant the caller must wait for, if any.
    fn wait_until(&self, now: Instant) -> Option<Instant> {
        let timing = self.timing();
        let blocked = timing.blocked_until.filter(|until| *until > now);
        let spaced = timing.next_free.filter(|until| *until > now);
        match (blocked, spaced) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

/// Permission to start one call of a role.
///
/// Holding an unstarted turn of a paced role keeps other callers of that role
/// waiting. Call [`RoleTurn::start`] right before issuing the request.
#[derive(Debug)]
#[must_use = "a turn only advances the pacing clock once started"]
pub struct RoleTurn {
    state: Arc<RoleState>,
    pace: Option<Pace>,
    _gate: Option<OwnedMutexGuard<()>>,
}

impl RoleTurn {
    /// Marks the call as started and schedules the next free slot.
    pub fn start(self) {
        if let Some(pace) = self.pace {
            let next = Instant::now() + pace.min_delay + random_jitter(pace.jitter);
            self.state.timing().next_free = Some(next);
        }
    }
}

impl RoleThrottle {
    /// Creates a throttle that paces no role.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias of [`RoleThrottle::new`] for call sites that want to say so.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Requires `min_delay` plus up to `jitter` between calls of `stage`.
    #[must_use]
    pub fn with_role(mut self, stage: Stage, min_delay: Duration, jitter: Duration) -> Self {
        if min_delay.is_zero() && jitter.is_zero() {
            self.paces.remove(&stage);
        } else {
            self.paces.insert(stage, Pace { min_delay, jitter });
        }
        self
    }

    /// Whether calls of `stage` are spaced at all.
    #[must_use]
    pub fn is_paced(&self, stage: Stage) -> bool {
        self.paces.contains_key(&stage)
    }

    fn state(&self, stage: Stage) -> Arc<RoleState> {
        // Clone the Arc so the DashMap shard lock is released before awaiting.
        self.roles
            .entry(stage)
            .or_insert_with(|| Arc::new(RoleState::default()))
            .clone()
    }

    /// Waits until a call of `stage` may start.
    ///
    /// The first call of a role proceeds immediately unless a server pause is
    /// in effect. A pause recorded while waiting extends the wait.
    #[instrument(skip(self), fields(role = stage.as_str()))]
    pub async fn acquire(&self, stage: Stage) -> RoleTurn {
        let pace = self.paces.get(&stage).copied();
        let state = self.state(stage);
        let gate = match pace {
            Some(_) => Some(Arc::clone(&state.gate).lock_owned().await),
            None => None,
        };

        while let Some(until) = state.wait_until(Instant::now()) {
            let delay = until.saturating_duration_since(Instant::now());
            let cumulative = state.add_cumulative_delay(delay);
            debug!(
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "pacing request"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    role = stage.as_str(),
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive pacing - backend may be throttling this run"
                );
            }
            tokio::time::sleep_until(until).await;
        }

        RoleTurn {
            state,
            pace,
            _gate: gate,
        }
    }

    /// Records a server-mandated pause for `stage`.
    #[instrument(skip(self), fields(role = stage.as_str()))]
    pub fn record_rate_limit(&self, stage: Stage, delay: Duration) {
        let delay = delay.min(MAX_RETRY_AFTER);
        let state = self.state(stage);
        let mut timing = state.timing();

        let until = Instant::now() + delay;
        timing.blocked_until = Some(timing.blocked_until.map_or(until, |current| current.max(until)));
        debug!(delay_ms = delay.as_millis(), "recorded server rate limit");
    }
}

#[allow(clippy::cast_possible_truncation)]
fn random_jitter(bound: Duration) -> Duration {
    let bound_ms = bound.as_millis() as u64;
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=bound_ms))
}

/// Parses a `Retry-After` header value into a delay.
///
/// Accepts integer seconds and HTTP-dates. Values above one hour are capped;
/// negative numbers, past dates and garbage yield `None`.
///
/// ```
/// use std::time::Duration;
/// use recipe_pipeline_core::throttle::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(seconds, "Retry-After exceeds maximum, capping at 1 hour");
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => {
            debug!("Retry-After date is in the past");
            None
        }
    }
}
