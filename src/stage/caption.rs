//! Caption artifact and text clean-up shared by the fetch and extract stages.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Output of the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionArtifact {
    /// Raw caption text as published with the post.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Lines containing any of these are call-to-action noise, not recipe content.
const MARKETING_KEYWORDS: &[&str] = &[
    "kommentiere",
    "comment",
    "link in bio",
    "follow for more",
    "sichere dir jetzt",
    "kostenloses erstgespräch",
];

#[allow(clippy::expect_used)]
static EMOJI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Extended_Pictographic}\u{FE0F}\u{200D}\u{20E3}\u{1F1E6}-\u{1F1FF}\u{1F3FB}-\u{1F3FF}]")
        .expect("emoji regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[@#][\p{L}\p{N}_.]+").expect("tag regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static BULLET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[•·▪▫◦‣\-–—*]+\s*").expect("bullet regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static OG_DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+(?:property|name)="og:description"\s+content="([^"]*)""#)
        .expect("og:description regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static OG_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+(?:property|name)="og:image"\s+content="([^"]*)""#)
        .expect("og:image regex is valid") // Static pattern, safe to panic
});

/// Prepares a caption for the language model.
///
/// Removes emoji, hashtags and mentions, drops marketing lines, normalizes
/// bullet markers to `- ` and collapses runs of blank lines.
#[must_use]
pub fn clean_caption(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = true;

    for line in raw.lines() {
        let lowered = line.to_lowercase();
        if MARKETING_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            continue;
        }

        let stripped = EMOJI_PATTERN.replace_all(line, "");
        let stripped = TAG_PATTERN.replace_all(&stripped, "");
        let had_bullet = BULLET_PATTERN.is_match(&stripped);
        let body = BULLET_PATTERN.replace(&stripped, "");
        let body = body.split_whitespace().collect::<Vec<_>>().join(" ");

        if body.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
            continue;
        }

        lines.push(if had_bullet { format!("- {body}") } else { body });
        previous_blank = false;
    }

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

/// Reads the caption and thumbnail from a post page's Open Graph tags.
///
/// Returns `None` when the page carries no usable description.
#[must_use]
pub fn caption_from_page(html: &str) -> Option<CaptionArtifact> {
    let description = OG_DESCRIPTION
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str()))?;

    let text = strip_post_preamble(&description);
    if text.is_empty() {
        return None;
    }

    let thumbnail_url = OG_IMAGE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str()))
        .filter(|url| !url.is_empty());

    Some(CaptionArtifact {
        text,
        thumbnail_url,
    })
}

/// Drops the "N likes, M comments - user on Instagram: \"...\"" wrapper.
fn strip_post_preamble(description: &str) -> String {
    let body = match description.split_once(" on Instagram: \"") {
        Some((_, rest)) => rest.strip_suffix('"').unwrap_or(rest),
        None => description,
    };
    body.trim().to_string()
}

fn decode_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';').filter(|end| *end <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        match decode_entity(&tail[1..end]) {
            Some(ch) => out.push(ch),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}
