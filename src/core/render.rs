//! Renderer module
//!
//! Renders a ScanReport to different output formats: jsonl, json, md, tree

use colored::Colorize;
use serde::Serialize;
use std::io::Write;

use crate::cache::StoreStats;
use crate::core::model::{EntryError, EntryKind, ScanEntry, ScanReport, Truncation};
use crate::core::util::format_bytes;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Json,
    Markdown,
    Tree,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonl" => Ok(OutputFormat::Jsonl),
            "json" => Ok(OutputFormat::Json),
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            "tree" => Ok(OutputFormat::Tree),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// Render configuration combining format and options
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderConfig {
    pub format: OutputFormat,
    pub pretty: bool,
    /// Leave ignored entries out of the output
    pub hide_ignored: bool,
}

impl RenderConfig {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    /// Create a new render config with pretty option
    pub fn with_pretty(format: OutputFormat, pretty: bool) -> Self {
        Self {
            format,
            pretty,
            ..Default::default()
        }
    }

    pub fn hide_ignored(mut self, hide: bool) -> Self {
        self.hide_ignored = hide;
        self
    }
}

/// One scan entry without its children, as emitted by jsonl
#[derive(Debug, Serialize)]
struct EntryRecord<'a> {
    path: &'a str,
    kind: EntryKind,
    depth: usize,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens: Option<usize>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncated: Option<Truncation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a EntryError>,
}

impl<'a> From<&'a ScanEntry> for EntryRecord<'a> {
    fn from(entry: &'a ScanEntry) -> Self {
        Self {
            path: if entry.relative.is_empty() {
                "."
            } else {
                &entry.relative
            },
            kind: entry.kind,
            depth: entry.depth,
            size: entry.size,
            tokens: entry.tokens,
            ignored: entry.ignored,
            truncated: entry.truncated,
            error: entry.error.as_ref(),
        }
    }
}

/// Renderer for scan reports
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            config: RenderConfig::new(format),
        }
    }

    /// Create a new renderer with render config
    pub fn with_config(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Render a scan report to a string
    pub fn render(&self, report: &ScanReport) -> String {
        match self.config.format {
            OutputFormat::Jsonl => self.render_jsonl(report),
            OutputFormat::Json => self.render_json(report),
            OutputFormat::Markdown => self.render_markdown(report),
            OutputFormat::Tree => self.render_tree(report),
        }
    }

    /// Render to a writer
    pub fn render_to<W: Write>(&self, report: &ScanReport, mut writer: W) -> std::io::Result<()> {
        let output = self.render(report);
        writer.write_all(output.as_bytes())?;
        writer.write_all(b"\n")
    }

    fn visible<'a>(&self, report: &'a ScanReport) -> impl Iterator<Item = &'a ScanEntry> {
        let hide = self.config.hide_ignored;
        report.entries().filter(move |e| !(hide && e.ignored))
    }

    fn to_json<T: Serialize>(&self, value: &T) -> Option<String> {
        if self.config.pretty {
            serde_json::to_string_pretty(value).ok()
        } else {
            serde_json::to_string(value).ok()
        }
    }

    /// Render as JSON Lines (one entry per line, pre-order)
    fn render_jsonl(&self, report: &ScanReport) -> String {
        self.visible(report)
            .filter_map(|entry| self.to_json(&EntryRecord::from(entry)))
            .collect::<Vec<_>>()
            .join(if self.config.pretty { "\n\n" } else { "\n" })
    }

    /// Render the whole report, tree included, as one JSON document
    fn render_json(&self, report: &ScanReport) -> String {
        let json = if self.config.hide_ignored {
            let mut pruned = report.clone();
            prune_ignored(&mut pruned.root);
            self.to_json(&pruned)
        } else {
            self.to_json(report)
        };
        json.unwrap_or_else(|| "{}".to_string())
    }

    /// Render as Markdown
    fn render_markdown(&self, report: &ScanReport) -> String {
        let mut output = String::new();

        output.push_str(&format!("## Scan of `{}`\n\n", report.root.path.display()));
        output.push_str(&format!("- Status: {}\n", report.status.as_str()));
        output.push_str(&format!(
            "- Files: {} processed, {} failed\n",
            report.files_processed, report.files_failed
        ));
        output.push_str(&format!(
            "- Tokens: {} ({}, {})\n\n",
            report.total_tokens,
            if report.exact_tokens { "exact" } else { "approximate" },
            report.encoding
        ));

        output.push_str("| Path | Tokens | Note |\n|---|---:|---|\n");
        for entry in self.visible(report).skip(1) {
            let mut path = entry.relative.clone();
            if entry.is_dir() {
                path.push('/');
            }
            let tokens = match (entry.tokens, entry.is_dir()) {
                (Some(tokens), _) => tokens.to_string(),
                (None, true) if !entry.ignored => entry.total_tokens().to_string(),
                _ => String::new(),
            };
            output.push_str(&format!("| `{}` | {} | {} |\n", path, tokens, note(entry)));
        }

        output
    }

    /// Render as an indented tree
    fn render_tree(&self, report: &ScanReport) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "{} {}\n",
            format!("{}/", report.root.path.display()).blue().bold(),
            format!("({} tokens)", report.root.total_tokens()).yellow()
        ));
        self.tree_children(&report.root, "", &mut output);

        let exactness = if report.exact_tokens {
            "exact"
        } else {
            "approximate"
        };
        let summary = format!(
            "{} files, {} failed, {} tokens ({}, {}) in {} ms",
            report.files_processed,
            report.files_failed,
            report.total_tokens,
            exactness,
            report.encoding,
            report.elapsed.as_millis()
        );
        output.push_str(&summary.dimmed().to_string());
        if !report.is_complete() {
            output.push_str(&format!(" {}", "[cancelled]".red()));
        }
        output
    }

    fn tree_children(&self, entry: &ScanEntry, prefix: &str, output: &mut String) {
        let children: Vec<&ScanEntry> = entry
            .children
            .iter()
            .filter(|c| !(self.config.hide_ignored && c.ignored))
            .collect();
        let last = children.len().saturating_sub(1);

        for (i, child) in children.into_iter().enumerate() {
            let (branch, extension) = if i == last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };

            let name = if child.is_dir() {
                format!("{}/", child.name()).blue().bold()
            } else {
                child.name().normal()
            };
            let name = if child.ignored { name.dimmed() } else { name };

            let mut line = format!("{}{}{}", prefix, branch, name);
            if let Some(tokens) = child.tokens {
                line.push_str(&format!(" {}", tokens.to_string().yellow()));
            } else if child.is_dir() && !child.ignored && child.truncated.is_none() {
                line.push_str(&format!(" {}", format!("({})", child.total_tokens()).yellow()));
            }
            let note = note(child);
            if !note.is_empty() {
                let note = if child.error.is_some() {
                    note.red()
                } else {
                    note.dimmed()
                };
                line.push_str(&format!(" {}", note));
            }
            output.push_str(&line);
            output.push('\n');

            if !child.children.is_empty() {
                self.tree_children(child, &format!("{}{}", prefix, extension), output);
            }
        }
    }
}

fn note(entry: &ScanEntry) -> String {
    if entry.ignored {
        return "[ignored]".to_string();
    }
    match (&entry.truncated, &entry.error) {
        (_, Some(error)) => format!("[{}]", error.message),
        (Some(Truncation::Depth), None) => "[depth limit]".to_string(),
        (Some(Truncation::Cycle), None) => "[already visited]".to_string(),
        (None, None) => String::new(),
    }
}

fn prune_ignored(entry: &mut ScanEntry) {
    entry.children.retain(|c| !c.ignored);
    for child in &mut entry.children {
        prune_ignored(child);
    }
}

/// Render cache statistics in the given format
pub fn render_stats(stats: &StoreStats, format: OutputFormat, pretty: bool) -> String {
    match format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let json = if pretty && format == OutputFormat::Json {
                serde_json::to_string_pretty(stats)
            } else {
                serde_json::to_string(stats)
            };
            json.unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Markdown | OutputFormat::Tree => {
            let mut output = String::from(
                "| Tier | Entries | Size | Budget | Hits | Misses | Computes | Evictions |\n\
                 |---|---:|---:|---:|---:|---:|---:|---:|\n",
            );
            for tier in stats.tiers() {
                output.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
                    tier.tier,
                    tier.entries,
                    format_bytes(tier.bytes),
                    format_bytes(tier.budget),
                    tier.hits,
                    tier.misses,
                    tier.computes,
                    tier.evictions
                ));
            }
            output
        }
    }
}
