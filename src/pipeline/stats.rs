use std::sync::atomic::{AtomicUsize, Ordering};

/// Live counters for one run.
///
/// Shared with the progress display; updated only by the orchestrator and
/// its workers.
#[derive(Debug, Default)]
pub struct RunStats {
    total: AtomicUsize,
    published: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    in_flight: AtomicUsize,
}

impl RunStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records known to the run, including ones finished earlier.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Retries scheduled during this run.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Stage calls currently executing.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Records that are neither published nor failed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.total()
            .saturating_sub(self.published() + self.failed())
    }

    pub(super) fn reset(&self, total: usize, published: usize, failed: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.published.store(published, Ordering::SeqCst);
        self.failed.store(failed, Ordering::SeqCst);
        self.retried.store(0, Ordering::SeqCst);
        self.in_flight.store(0, Ordering::SeqCst);
    }

    pub(super) fn increment_published(&self) {
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn start_call(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn finish_call(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
