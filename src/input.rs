//! Input collection loading.
//!
//! Two formats are accepted:
//!
//! - an Instagram data export (`saved_collections.json`), optionally
//!   filtered to one named collection;
//! - a plain JSON array of `{ "url": ..., "id": ..., "caption": ... }`
//!   objects where `id` and `caption` are optional.
//!
//! Every item gets a stable id (the post shortcode when the URL has one) and
//! duplicates are dropped, keeping first-seen order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Shortcode in `/p/<code>`, `/reel/<code>` or `/reels/<code>`.
#[allow(clippy::expect_used)]
static SHORTCODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:p|reel|reels)/([A-Za-z0-9_-]+)").expect("SHORTCODE_PATTERN is a valid regex")
});

/// One item of the input collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub id: String,
    pub url: String,
    /// Caption carried by the input, if any.
    pub caption: Option<String>,
}

impl SourceItem {
    /// Builds an item with an id derived from `url`.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: derive_id(&url),
            url,
            caption: None,
        }
    }
}

/// Errors raised while loading the input collection.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read input file {path}: {source}\n  Suggestion: Check the path and file permissions")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("input is not valid JSON: {0}\n  Suggestion: Re-export the collection or fix the file by hand")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized input format: {0}\n  Suggestion: Provide an Instagram saved_collections export or a JSON array of {{\"url\": ...}} objects")]
    UnknownFormat(String),

    #[error("collection '{0}' not found in the export\n  Suggestion: Check the collection name (it is case-sensitive)")]
    CollectionNotFound(String),

    #[error("input item {index} has an invalid URL '{url}'")]
    InvalidUrl { index: usize, url: String },
}

#[derive(Debug, Deserialize)]
struct PlainItem {
    url: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    caption: Option<String>,
}

/// Reads and parses an input file.
///
/// # Errors
///
/// See [`InputError`].
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_input(path: &Path, collection: Option<&str>) -> Result<Vec<SourceItem>, InputError> {
    let content = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let items = parse_input_str(&content, collection)?;
    info!(count = items.len(), "input collection loaded");
    Ok(items)
}

/// Parses input collection text.
///
/// # Errors
///
/// See [`InputError`].
pub fn parse_input_str(content: &str, collection: Option<&str>) -> Result<Vec<SourceItem>, InputError> {
    let value: Value = serde_json::from_str(content)?;

    let items = match &value {
        Value::Object(map) => match map.get("saved_saved_collections") {
            Some(Value::Array(entries)) => parse_export(entries, collection)?,
            _ => {
                return Err(InputError::UnknownFormat(
                    "object without 'saved_saved_collections'".to_string(),
                ));
            }
        },
        Value::Array(_) => {
            if collection.is_some() {
                warn!("collection filter ignored for a plain URL list");
            }
            parse_plain(value)?
        }
        _ => return Err(InputError::UnknownFormat("expected an object or array".to_string())),
    };

    Ok(dedupe(items))
}

fn parse_plain(value: Value) -> Result<Vec<SourceItem>, InputError> {
    let plain: Vec<PlainItem> = serde_json::from_value(value)?;
    plain
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if url::Url::parse(&item.url).is_err() {
                return Err(InputError::InvalidUrl {
                    index,
                    url: item.url,
                });
            }
            let id = item
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| derive_id(&item.url));
            Ok(SourceItem {
                id,
                url: item.url,
                caption: item.caption.filter(|c| !c.trim().is_empty()),
            })
        })
        .collect()
}

/// Walks the export entries. `Collection` headers open a collection; other
/// entries are posts of the collection opened last.
fn parse_export(entries: &[Value], collection: Option<&str>) -> Result<Vec<SourceItem>, InputError> {
    let mut items = Vec::new();
    let mut in_target = collection.is_none();
    let mut found = collection.is_none();

    for entry in entries {
        let fields = &entry["string_map_data"];
        if entry["title"].as_str() == Some("Collection") {
            let Some(wanted) = collection else { continue };
            let name = fields["Name"]["value"].as_str();
            if name == Some(wanted) {
                in_target = true;
                found = true;
            } else if in_target {
                debug!(collection = wanted, "reached end of collection");
                break;
            }
            continue;
        }

        if !in_target {
            continue;
        }
        if let Some(url) = fields["Name"]["href"].as_str()
            && (url.contains("/p/") || url.contains("/reel/"))
        {
            items.push(SourceItem::from_url(url));
        }
    }

    match collection {
        Some(name) if !found => Err(InputError::CollectionNotFound(name.to_string())),
        Some(name) if items.is_empty() => {
            warn!(collection = name, "collection contains no posts");
            Ok(items)
        }
        _ => Ok(items),
    }
}

fn dedupe(items: Vec<SourceItem>) -> Vec<SourceItem> {
    let mut seen = HashSet::new();
    let before = items.len();
    let unique: Vec<SourceItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect();
    if unique.len() < before {
        debug!(dropped = before - unique.len(), "dropped duplicate input items");
    }
    unique
}

/// Stable id for a post URL: the shortcode, or the URL itself.
///
/// ```
/// use recipe_pipeline_core::input::derive_id;
///
/// assert_eq!(derive_id("https://www.instagram.com/reel/C1a2B3/?igsh=x"), "C1a2B3");
/// assert_eq!(derive_id("https://example.com/post"), "https://example.com/post");
/// ```
#[must_use]
pub fn derive_id(url: &str) -> String {
    SHORTCODE_PATTERN
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| url.trim().to_string(), |m| m.as_str().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"{
        "saved_saved_collections": [
            {"title": "Collection", "string_map_data": {"Name": {"value": "Travel"}}},
            {"string_map_data": {"Name": {"href": "https://www.instagram.com/p/TRAVEL1/", "value": "a"}}},
            {"title": "Collection", "string_map_data": {"Name": {"value": "Food"}}},
            {"string_map_data": {"Name": {"href": "https://www.instagram.com/p/AAA/", "value": "chef"}}},
            {"string_map_data": {"Name": {"href": "https://www.instagram.com/reel/BBB/", "value": "chef"}}},
            {"string_map_data": {"Name": {"href": "https://www.instagram.com/stories/x/1/", "value": "chef"}}},
            {"string_map_data": {"Name": {"href": "https://www.instagram.com/p/AAA/?igsh=dup", "value": "chef"}}},
            {"title": "Collection", "string_map_data": {"Name": {"value": "Later"}}},
            {"string_map_data": {"Name": {"href": "https://www.instagram.com/p/LATER/", "value": "b"}}}
        ]
    }"#;

    // ==================== Export Tests ====================

    #[test]
    fn test_export_filtered_by_collection() {
        let items = parse_input_str(EXPORT, Some("Food")).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["AAA", "BBB"]);
        assert_eq!(items[1].url, "https://www.instagram.com/reel/BBB/");
    }

    #[test]
    fn test_export_without_filter_takes_all_posts() {
        let items = parse_input_str(EXPORT, None).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["TRAVEL1", "AAA", "BBB", "LATER"]);
    }

    #[test]
    fn test_export_missing_collection() {
        let err = parse_input_str(EXPORT, Some("Desserts")).unwrap_err();
        assert!(matches!(err, InputError::CollectionNotFound(name) if name == "Desserts"));
    }

    // ==================== Plain List Tests ====================

    #[test]
    fn test_plain_list_with_optional_fields() {
        let items = parse_input_str(
            r#"[
                {"url": "https://www.instagram.com/p/X1/", "caption": "Soup\n200g carrots"},
                {"url": "https://blog.example/recipe", "id": "custom"},
                {"url": "https://www.instagram.com/p/X1/"}
            ]"#,
            None,
        )
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "X1");
        assert_eq!(items[0].caption.as_deref(), Some("Soup\n200g carrots"));
        assert_eq!(items[1].id, "custom");
        assert_eq!(items[1].caption, None);
    }

    #[test]
    fn test_plain_list_rejects_bad_url() {
        let err = parse_input_str(r#"[{"url": "not a url"}]"#, None).unwrap_err();
        assert!(matches!(err, InputError::InvalidUrl { index: 0, .. }));
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            parse_input_str(r#"{"posts": []}"#, None),
            Err(InputError::UnknownFormat(_))
        ));
        assert!(matches!(parse_input_str("42", None), Err(InputError::UnknownFormat(_))));
        assert!(matches!(parse_input_str("{", None), Err(InputError::Json(_))));
    }

    #[test]
    fn test_derive_id_variants() {
        assert_eq!(derive_id("https://www.instagram.com/p/Abc_-1/"), "Abc_-1");
        assert_eq!(derive_id("https://www.instagram.com/reels/R9/"), "R9");
    }

    #[test]
    fn test_load_input_missing_file() {
        let err = load_input(Path::new("/definitely/not/here.json"), None).unwrap_err();
        assert!(matches!(err, InputError::Io { .. }));
        assert!(err.to_string().contains("Suggestion"));
    }
}
