//! Terminal rendering of run summaries and checkpoint status.

use std::collections::BTreeMap;
use std::path::Path;

use recipe_pipeline_core::RunSummary;
use recipe_pipeline_core::record::StatusCounts;
use recipe_pipeline_core::report::FailureEntry;

use crate::failure;

/// Returns terminal width from COLUMNS, or 80 if unset/invalid.
pub(crate) fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub(crate) fn truncate_to_width(text: &str, width: usize) -> String {
    let text_len = text.chars().count();
    if text_len <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    if width == 1 {
        return "…".to_string();
    }

    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

pub(crate) fn render_status_lines(checkpoint: &Path, counts: &StatusCounts) -> Vec<String> {
    vec![
        format!("Checkpoint: {}", checkpoint.display()),
        format!("  total:           {}", counts.total()),
        format!("  pending:         {}", counts.pending),
        format!("  caption_fetched: {}", counts.caption_fetched),
        format!("  structured:      {}", counts.structured),
        format!("  published:       {}", counts.published),
        format!("  failed:          {}", counts.failed),
    ]
}

pub(crate) fn render_run_summary_line(summary: &RunSummary) -> String {
    let mut line = format!(
        "Published {}, failed {}, pending {}",
        summary.published, summary.failed, summary.pending
    );
    if summary.retried > 0 {
        line.push_str(&format!(" ({} retries)", summary.retried));
    }
    if summary.interrupted {
        line.push_str(" - interrupted, rerun to resume");
    }
    line
}

pub(crate) fn render_failure_summary_lines(failures: &[FailureEntry], width: usize) -> Vec<String> {
    if failures.is_empty() {
        return Vec::new();
    }

    let mut grouped: BTreeMap<failure::FailureCategory, Vec<&FailureEntry>> = BTreeMap::new();
    for entry in failures {
        let descriptor = failure::describe_failure(entry.stage, entry.kind);
        grouped.entry(descriptor.category).or_default().push(entry);
    }

    let mut lines = vec![truncate_to_width("Failure summary by category:", width)];
    for (category, entries) in &grouped {
        let header = format!("- {} {}: {}", category.icon(), category.label(), entries.len());
        lines.push(truncate_to_width(&header, width));

        // A single kind gets the specific wording; mixed groups fall back to the category.
        let first = entries[0];
        let descriptor = if entries.iter().all(|e| e.kind == first.kind && e.stage == first.stage) {
            failure::describe_failure(first.stage, first.kind)
        } else {
            failure::category_failure_descriptor(*category)
        };
        lines.push(truncate_to_width(&format!("  What: {}", descriptor.what), width));
        lines.push(truncate_to_width(&format!("  Why: {}", descriptor.why), width));
        lines.push(truncate_to_width(&format!("  Fix: {}", descriptor.fix), width));

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        lines.push(truncate_to_width(&format!("  Records: {}", ids.join(", ")), width));
    }

    lines
}

pub(crate) fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
