//! In-memory record store.
//!
//! The store is a table of [`Record`]s keyed by id, kept in first-seen order.
//! It has no persistence side effects; the orchestrator hands it to a
//! [`ProgressPersister`](crate::checkpoint::ProgressPersister) after every
//! change.

mod error;
mod item;

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::input::SourceItem;

pub use error::StoreError;
pub use item::{
    Artifacts, ErrorKind, LastError, Record, Stage, StageArtifact, StageStatus,
};

/// Whether seeding created a new record or touched an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Created,
    Merged,
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub caption_fetched: usize,
    pub structured: usize,
    pub published: usize,
    pub failed: usize,
}

impl StatusCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.caption_fetched + self.structured + self.published + self.failed
    }

    /// Records that are not yet terminal.
    #[must_use]
    pub fn unfinished(&self) -> usize {
        self.pending + self.caption_fetched + self.structured
    }
}

/// Table of per-item state.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: HashMap<String, Record>,
    order: Vec<String>,
}

impl RecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from loaded records, ordering them by `position`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if two records share an id.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Result<Self, StoreError> {
        let mut records: Vec<Record> = records.into_iter().collect();
        records.sort_by_key(|record| record.position);

        let mut store = Self::new();
        for record in records {
            if store.records.contains_key(&record.id) {
                return Err(StoreError::DuplicateId(record.id));
            }
            store.order.push(record.id.clone());
            store.records.insert(record.id.clone(), record);
        }
        Ok(store)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    /// Inserts or replaces a record.
    ///
    /// A new id is appended to the end of the first-seen order and its
    /// `position` is reassigned accordingly.
    pub fn upsert(&mut self, mut record: Record) {
        if let Some(existing) = self.records.get_mut(&record.id) {
            record.position = existing.position;
            *existing = record;
            return;
        }
        record.position = self.next_position();
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    /// All records in first-seen order.
    pub fn all(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    #[must_use]
    pub fn count_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.records.values() {
            match record.stage_status {
                StageStatus::Pending => counts.pending += 1,
                StageStatus::CaptionFetched => counts.caption_fetched += 1,
                StageStatus::Structured => counts.structured += 1,
                StageStatus::Published => counts.published += 1,
                StageStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Creates a record for a source item, or merges into the existing one.
    ///
    /// Merging never changes status or artifacts; it only fills an inline
    /// caption the record does not have yet.
    pub fn seed(&mut self, item: &SourceItem) -> SeedOutcome {
        if let Some(existing) = self.records.get_mut(&item.id) {
            if existing.inline_caption.is_none() && item.caption.is_some() {
                existing.inline_caption.clone_from(&item.caption);
            }
            return SeedOutcome::Merged;
        }

        let mut record = Record::new(&item.id, &item.url, self.next_position());
        record.inline_caption.clone_from(&item.caption);
        debug!(id = %item.id, url = %item.url, "seeded new record");
        self.order.push(item.id.clone());
        self.records.insert(item.id.clone(), record);
        SeedOutcome::Created
    }

    /// Ids of non-terminal records in first-seen order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.all()
            .filter(|record| !record.is_terminal())
            .map(|record| record.id.clone())
            .collect()
    }

    /// Resets one `Failed` record to `Pending`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] or [`StoreError::NotFailed`].
    pub fn reset_failed(&mut self, id: &str) -> Result<(), StoreError> {
        self.records
            .get_mut(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?
            .reset()
    }

    /// Resets every `Failed` record; returns how many were reset.
    pub fn reset_all_failed(&mut self) -> usize {
        let mut reset = 0;
        for record in self.records.values_mut() {
            if record.reset().is_ok() {
                reset += 1;
            }
        }
        reset
    }

    fn next_position(&self) -> usize {
        self.records
            .values()
            .map(|record| record.position + 1)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(id: &str) -> SourceItem {
        SourceItem {
            id: id.to_string(),
            url: format!("https://www.instagram.com/p/{id}/"),
            caption: None,
        }
    }

    // ==================== Seeding Tests ====================

    #[test]
    fn test_seed_creates_in_first_seen_order() {
        let mut store = RecordStore::new();
        store.seed(&item("c"));
        store.seed(&item("a"));
        store.seed(&item("b"));

        let ids: Vec<&str> = store.all().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(store.get("b").unwrap().position, 2);
    }

    #[test]
    fn test_seed_merges_existing_without_touching_status() {
        let mut store = RecordStore::new();
        store.seed(&item("a"));
        store.get_mut("a").unwrap().give_up(Stage::Fetch);

        let mut with_caption = item("a");
        with_caption.caption = Some("Soup".to_string());
        let outcome = store.seed(&with_caption);

        assert_eq!(outcome, SeedOutcome::Merged);
        assert_eq!(store.len(), 1);
        let record = store.get("a").unwrap();
        assert_eq!(record.stage_status, StageStatus::Failed);
        assert_eq!(record.inline_caption.as_deref(), Some("Soup"));
    }

    #[test]
    fn test_from_records_orders_by_position() {
        let mut second = Record::new("b", "https://x/p/b", 1);
        second.stage_status = StageStatus::Published;
        let first = Record::new("a", "https://x/p/a", 0);

        let store = RecordStore::from_records(vec![second, first]).unwrap();

        let ids: Vec<&str> = store.all().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.pending_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn test_from_records_rejects_duplicates() {
        let result = RecordStore::from_records(vec![
            Record::new("a", "https://x/p/a", 0),
            Record::new("a", "https://x/p/a", 1),
        ]);
        assert!(matches!(result, Err(StoreError::DuplicateId(id)) if id == "a"));
    }

    #[test]
    fn test_upsert_replaces_and_appends() {
        let mut store = RecordStore::new();
        store.seed(&item("a"));

        let mut updated = store.get("a").unwrap().clone();
        updated.attempts = 2;
        store.upsert(updated);
        store.upsert(Record::new("z", "https://x/p/z", 99));

        assert_eq!(store.get("a").unwrap().attempts, 2);
        assert_eq!(store.get("z").unwrap().position, 1);
        assert_eq!(store.len(), 2);
    }

    // ==================== Count / Reset Tests ====================

    #[test]
    fn test_count_by_status() {
        let mut store = RecordStore::new();
        for id in ["a", "b", "c"] {
            store.seed(&item(id));
        }
        store.get_mut("b").unwrap().give_up(Stage::Extract);

        let counts = store.count_by_status();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.unfinished(), 2);
    }

    #[test]
    fn test_reset_failed_single_and_all() {
        let mut store = RecordStore::new();
        for id in ["a", "b", "c"] {
            store.seed(&item(id));
        }
        store.get_mut("a").unwrap().give_up(Stage::Fetch);
        store.get_mut("b").unwrap().give_up(Stage::Publish);

        store.reset_failed("a").unwrap();
        assert_eq!(store.get("a").unwrap().stage_status, StageStatus::Pending);
        assert!(matches!(
            store.reset_failed("c"),
            Err(StoreError::NotFailed { .. })
        ));
        assert!(matches!(
            store.reset_failed("missing"),
            Err(StoreError::RecordNotFound(_))
        ));

        assert_eq!(store.reset_all_failed(), 1);
        assert_eq!(store.count_by_status().failed, 0);
    }
}
