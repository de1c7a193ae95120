//! Output collection and failure log.
//!
//! Both documents are derived from the record store alone, so they can be
//! regenerated from a checkpoint at any time. They list records in
//! first-seen order and are replaced atomically.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::checkpoint::{PersistError, write_atomic};
use crate::record::{ErrorKind, RecordStore, Stage, StageStatus};
use crate::stage::Recipe;

/// One published recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub id: String,
    pub source_url: String,
    pub public_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub recipe: Recipe,
}

/// One record that gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub id: String,
    pub source_url: String,
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// Published records with their artifacts.
#[must_use]
pub fn collect_outputs(store: &RecordStore) -> Vec<OutputEntry> {
    store
        .all()
        .filter(|record| record.stage_status == StageStatus::Published)
        .filter_map(|record| {
            let recipe = record.artifacts.recipe.clone()?;
            let page = record.artifacts.published.as_ref()?;
            let thumbnail_url = recipe.thumbnail_url.clone().or_else(|| {
                record
                    .artifacts
                    .caption
                    .as_ref()
                    .and_then(|caption| caption.thumbnail_url.clone())
            });
            Some(OutputEntry {
                id: record.id.clone(),
                source_url: record.source_url.clone(),
                public_url: page.url.clone(),
                thumbnail_url,
                recipe,
            })
        })
        .collect()
}

/// Failed records with their last error.
#[must_use]
pub fn collect_failures(store: &RecordStore) -> Vec<FailureEntry> {
    store
        .all()
        .filter(|record| record.stage_status == StageStatus::Failed)
        .map(|record| {
            let error = record.last_error.as_ref();
            FailureEntry {
                id: record.id.clone(),
                source_url: record.source_url.clone(),
                stage: record
                    .failed_stage
                    .or_else(|| error.map(|e| e.stage))
                    .unwrap_or(Stage::Fetch),
                kind: error.map_or(ErrorKind::Network, |e| e.kind),
                message: error.map(|e| e.message.clone()).unwrap_or_default(),
                attempts: record.attempts,
            }
        })
        .collect()
}

/// Serializes `value` as pretty JSON and replaces `path` atomically.
///
/// # Errors
///
/// Returns [`PersistError`] on encoding or I/O failure.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let mut content = serde_json::to_vec_pretty(value)?;
    content.push(b'\n');
    write_atomic(path, &content)
}

/// Writes the output collection and the failure log for `store`.
///
/// Returns the number of published and failed entries written.
///
/// # Errors
///
/// Returns the first [`PersistError`].
#[instrument(skip(store), fields(output = %output.display(), failure_log = %failure_log.display()))]
pub fn write_reports(
    store: &RecordStore,
    output: &Path,
    failure_log: &Path,
) -> Result<(usize, usize), PersistError> {
    let outputs = collect_outputs(store);
    let failures = collect_failures(store);
    write_json(output, &outputs)?;
    write_json(failure_log, &failures)?;
    info!(published = outputs.len(), failed = failures.len(), "reports written");
    Ok((outputs.len(), failures.len()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::input::SourceItem;
    use crate::record::StageArtifact;
    use crate::stage::{CaptionArtifact, PublishedPage, parse_model_output};

    fn store() -> RecordStore {
        let mut store = RecordStore::new();
        for id in ["a", "b", "c"] {
            store.seed(&SourceItem::from_url(format!("https://www.instagram.com/p/{id}/")));
        }

        let a = store.get_mut("a").unwrap();
        a.apply_success(StageArtifact::Caption(CaptionArtifact {
            text: "Bread".to_string(),
            thumbnail_url: Some("https://cdn/a.jpg".to_string()),
        }))
        .unwrap();
        let recipe = parse_model_output(
            r#"{"title": "Bread", "ingredients": [{"ingredients": [{"name": "Flour"}]}]}"#,
            "test",
        )
        .unwrap();
        a.apply_success(StageArtifact::Recipe(recipe)).unwrap();
        a.apply_success(StageArtifact::Published(PublishedPage {
            url: "https://telegra.ph/Bread-01".to_string(),
            path: "Bread-01".to_string(),
        }))
        .unwrap();

        let b = store.get_mut("b").unwrap();
        b.apply_success(StageArtifact::Caption(CaptionArtifact {
            text: "x".to_string(),
            thumbnail_url: None,
        }))
        .unwrap();
        b.note_failure(Stage::Extract, ErrorKind::Schema, "recipe has no title");
        b.give_up(Stage::Extract);
        store
    }

    #[test]
    fn test_collect_outputs_only_published() {
        let outputs = collect_outputs(&store());
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].id, "a");
        assert_eq!(outputs[0].public_url, "https://telegra.ph/Bread-01");
        assert_eq!(outputs[0].thumbnail_url.as_deref(), Some("https://cdn/a.jpg"));
        assert_eq!(outputs[0].recipe.title, "Bread");
    }

    #[test]
    fn test_collect_failures_with_last_error() {
        let failures = collect_failures(&store());
        assert_eq!(
            failures,
            vec![FailureEntry {
                id: "b".to_string(),
                source_url: "https://www.instagram.com/p/b/".to_string(),
                stage: Stage::Extract,
                kind: ErrorKind::Schema,
                message: "recipe has no title".to_string(),
                attempts: 1,
            }]
        );
    }

    #[test]
    fn test_write_reports_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out/recipes.json");
        let failure_log = dir.path().join("out/failed.json");

        let counts = write_reports(&store(), &output, &failure_log).unwrap();
        assert_eq!(counts, (1, 1));

        let outputs: Vec<OutputEntry> =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(outputs[0].id, "a");
        let failures: Vec<FailureEntry> =
            serde_json::from_str(&std::fs::read_to_string(&failure_log).unwrap()).unwrap();
        assert_eq!(failures[0].kind, ErrorKind::Schema);
    }

    #[test]
    fn test_write_reports_empty_store_writes_empty_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("recipes.json");
        let failure_log = dir.path().join("failed.json");

        write_reports(&RecordStore::new(), &output, &failure_log).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap().trim(), "[]");
    }
}
