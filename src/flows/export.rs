//! Markdown export flow - Turn a scan into one pasteable document
//!
//! The document has a header with totals, the directory structure with
//! per-file token counts, and one fenced section per processed file. File
//! text is read through the content tier, so exporting right after a scan
//! does not touch the disk again.

use chrono::{DateTime, Utc};
use std::fmt::Write as _;

use crate::backends::scan::ScanEngine;
use crate::core::file_reader::{FileReadConfig, DEFAULT_MAX_FILE_SIZE};
use crate::core::model::{ScanEntry, ScanReport, Truncation};
use crate::core::paths::language_for;

/// Options for the export
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Relative paths (files or directories) to include; empty means all
    pub only: Vec<String>,
    pub max_file_size: u64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            only: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl ExportOptions {
    fn selects(&self, relative: &str) -> bool {
        self.only.is_empty()
            || self.only.iter().any(|only| {
                let only = only.trim_matches('/');
                only.is_empty()
                    || relative == only
                    || relative
                        .strip_prefix(only)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }
}

/// Build the Markdown document for `report`, stamped with the current time
pub fn export_markdown(
    engine: &ScanEngine,
    report: &ScanReport,
    options: &ExportOptions,
) -> String {
    render_markdown(engine, report, options, Utc::now())
}

/// Build the Markdown document for `report`
pub fn render_markdown(
    engine: &ScanEngine,
    report: &ScanReport,
    options: &ExportOptions,
    generated_at: DateTime<Utc>,
) -> String {
    let read_config = FileReadConfig::with_max_file_size(options.max_file_size);
    let files: Vec<&ScanEntry> = report
        .entries()
        .filter(|e| e.tokens.is_some() && !e.ignored && options.selects(&e.relative))
        .collect();
    let selected_tokens: usize = files.iter().filter_map(|e| e.tokens).sum();

    let mut out = String::new();
    let root_name = report.root.name();
    let title = if root_name.is_empty() {
        "Project"
    } else {
        root_name.as_str()
    };
    let _ = writeln!(out, "# {}\n", title);
    let _ = writeln!(out, "- Root: `{}`", report.root.path.display());
    let _ = writeln!(
        out,
        "- Generated: {}",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "- Files: {}", files.len());
    let _ = writeln!(
        out,
        "- Tokens: {} ({}, {})",
        selected_tokens,
        if report.exact_tokens { "exact" } else { "approximate" },
        report.encoding
    );
    if !report.is_complete() {
        out.push_str("- Note: scan was cancelled; the listing is partial\n");
    }

    out.push_str("\n## Structure\n\n```text\n");
    let _ = writeln!(out, "{}/", if root_name.is_empty() { "." } else { title });
    structure(&report.root, "", &mut out);
    out.push_str("```\n");

    if !files.is_empty() {
        out.push_str("\n## Files\n");
    }
    for entry in files {
        let _ = writeln!(out, "\n### {}\n", entry.relative);
        match engine.content_of(&entry.path, &read_config) {
            Ok(text) => {
                let fence = fence_for(&text);
                let _ = writeln!(out, "{}{}", fence, language_for(&entry.path));
                out.push_str(&text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
                let _ = writeln!(out, "{}", fence);
            }
            Err(err) => {
                tracing::warn!(path = %entry.path.display(), error = %err, "file left out of export");
                let _ = writeln!(out, "_Unavailable: {}_", err);
            }
        }
    }

    out
}

fn structure(entry: &ScanEntry, prefix: &str, out: &mut String) {
    let visible: Vec<&ScanEntry> = entry.children.iter().filter(|c| !c.ignored).collect();
    let last = visible.len().saturating_sub(1);

    for (i, child) in visible.into_iter().enumerate() {
        let (branch, extension) = if i == last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        let _ = write!(out, "{}{}{}", prefix, branch, child.name());
        if child.is_dir() {
            out.push('/');
        }
        match (child.tokens, child.truncated) {
            (Some(tokens), _) => {
                let _ = write!(out, " ({} tokens)", tokens);
            }
            (None, Some(Truncation::Depth)) => out.push_str(" (depth limit)"),
            (None, Some(Truncation::Cycle)) => out.push_str(" (already listed)"),
            (None, None) => {}
        }
        out.push('\n');
        structure(child, &format!("{}{}", prefix, extension), out);
    }
}

/// A backtick fence longer than any run of backticks in `text`
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in text.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}
