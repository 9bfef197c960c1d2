//! CLI module - Command-line interface definitions and handlers

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backends::doctor::run_doctor;
use crate::backends::scan::ScanOptions;
use crate::config::Config;
use crate::core::file_reader::{read_text, FileReadConfig};
use crate::core::model::ScanReport;
use crate::core::paths::{make_relative, normalize_path};
use crate::core::render::{render_stats, OutputFormat, RenderConfig, Renderer};
use crate::core::tokenizer::{TokenEstimator, TokenModel};
use crate::flows::export::{export_markdown, ExportOptions};
use crate::session::Session;
use crate::tasks::{TaskEvent, TaskOutcome};

/// contextor - scan a project, count its LLM tokens and export it as one document.
#[derive(Parser, Debug)]
#[command(name = "contextor")]
#[command(
    author,
    version,
    about,
    long_about = r#"contextor walks a directory tree, estimates the LLM token cost of every file,
and assembles the result into a single artifact you can paste into a prompt.

Directory listings, file contents and token counts are cached in memory for
the lifetime of the process, so repeated scans of an unchanged tree are cheap.

Output formats:
- jsonl: one JSON object per entry (best for piping into tools)
- json: the whole report as a single JSON document
- md: human-friendly Markdown
- tree: an indented, colored tree

Examples:
    contextor scan --format tree
    contextor scan --max-depth 2 --ignore fixtures --stats
    contextor tokens src/main.rs --model o200k
    contextor export --output context.md --only src
"#
)]
pub struct Cli {
    /// Root directory for all operations.
    #[arg(
        long,
        global = true,
        default_value = ".",
        value_name = "ROOT",
        long_help = "Root directory for all operations (defaults to the current directory).\n\n\
All paths emitted in results are relative to this root. A contextor.toml in\n\
this directory is loaded automatically unless --config is given."
    )]
    pub root: PathBuf,

    /// Output format (jsonl/json/md/tree).
    #[arg(
        long,
        global = true,
        default_value = "jsonl",
        value_name = "FORMAT",
        long_help = "Select the output format.\n\n\
Supported values:\n\
- jsonl (default)\n\
- json\n\
- md (markdown)\n\
- tree\n\n\
Tip: Prefer jsonl when you want stable, line-oriented output for piping and prompts."
    )]
    pub format: String,

    /// Configuration file (TOML).
    #[arg(
        long,
        global = true,
        env = "CONTEXTOR_CONFIG",
        value_name = "FILE",
        long_help = "Load configuration from FILE instead of ROOT/contextor.toml.\n\n\
The file may set cache budgets, the eviction policy, scan defaults and the\n\
tokenizer model. Command-line flags override values from the file."
    )]
    pub config: Option<PathBuf>,

    /// Disable colored output (when applicable).
    #[arg(
        long,
        global = true,
        long_help = "Disable colored output. This is useful when piping to files or when your\n\
terminal does not support ANSI colors."
    )]
    pub no_color: bool,

    /// Quiet mode (errors only on stderr).
    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        long_help = "Only log errors to stderr. Results are still printed to stdout.\n\n\
RUST_LOG, when set, takes precedence."
    )]
    pub quiet: bool,

    /// Verbose mode (debug logging on stderr).
    #[arg(
        short,
        long,
        global = true,
        long_help = "Log debug diagnostics to stderr: cache misses, traversal decisions and\n\
scan progress. RUST_LOG, when set, takes precedence."
    )]
    pub verbose: bool,

    /// Pretty-print JSON/JSONL output with indentation.
    #[arg(
        long,
        global = true,
        long_help = "Pretty-print JSON and JSONL output with indentation for human readability.\n\n\
Has no effect on md/tree formats."
    )]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan ROOT and report token counts per file.
    #[command(
        long_about = "Scan the directory tree under ROOT on a background worker, count tokens for\n\
every file that is not ignored, and print the resulting tree.\n\n\
Entries are emitted depth-first with siblings in lexicographic order, so output\n\
is stable across runs.\n\n\
Examples:\n\
  contextor scan --format tree\n\
  contextor scan --max-depth 3 --ignore '*.snap'\n\
  contextor scan --repeat 3 --stats\n"
    )]
    Scan {
        /// Maximum directory depth below ROOT.
        #[arg(
            long,
            value_name = "N",
            long_help = "Directories deeper than N are listed but not expanded.\n\n\
If omitted, the configured depth (or no limit) applies."
        )]
        max_depth: Option<usize>,

        /// Extra ignore pattern (name or gitignore glob). Repeatable.
        #[arg(
            long,
            value_name = "PATTERN",
            long_help = "Ignore entries matching PATTERN, in addition to the defaults.\n\n\
Plain names (fixtures) match at any depth; globs (*.snap, /docs) follow\n\
gitignore rules. May be given multiple times."
        )]
        ignore: Vec<String>,

        /// Do not apply the built-in ignore list.
        #[arg(
            long,
            long_help = "Disable the built-in ignore names (node_modules, .git, target, ...) and\n\
extensions (.log, .pyc, .so, ...). Patterns from --ignore still apply."
        )]
        no_default_ignores: bool,

        /// Leave ignored entries out of the output.
        #[arg(long)]
        hide_ignored: bool,

        /// Token model (cl100k, o200k, gpt4, gpt4o, gpt35, claude3, heuristic).
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,

        /// Run the scan N times on the same cache.
        #[arg(
            long,
            value_name = "N",
            default_value_t = 1,
            long_help = "Run the scan N times in a row against the same in-memory cache and print\n\
the last report. Later rounds are served from the cache for unchanged files."
        )]
        repeat: usize,

        /// Print cache statistics to stderr.
        #[arg(long)]
        stats: bool,
    },

    /// Count tokens in files, or in stdin when no file is given.
    #[command(
        long_about = "Count tokens for each FILE (relative to ROOT) and report whether the count is\n\
exact or a heuristic estimate. Reads stdin when no file is given.\n\n\
Examples:\n\
  contextor tokens README.md src/main.rs\n\
  cat prompt.txt | contextor tokens --model o200k\n"
    )]
    Tokens {
        /// Files to count.
        files: Vec<PathBuf>,

        /// Token model (cl100k, o200k, gpt4, gpt4o, gpt35, claude3, heuristic).
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,
    },

    /// Export ROOT as a single Markdown document.
    #[command(
        long_about = "Scan ROOT and write a Markdown document with a header, the directory\n\
structure with token counts, and one fenced code section per file.\n\n\
Examples:\n\
  contextor export > context.md\n\
  contextor export --output context.md --only src --only Cargo.toml\n"
    )]
    Export {
        /// Write to FILE instead of stdout.
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Maximum directory depth below ROOT.
        #[arg(long, value_name = "N")]
        max_depth: Option<usize>,

        /// Extra ignore pattern (name or gitignore glob). Repeatable.
        #[arg(long, value_name = "PATTERN")]
        ignore: Vec<String>,

        /// Only include these relative paths (files or directories). Repeatable.
        #[arg(long, value_name = "PATH")]
        only: Vec<String>,

        /// Token model (cl100k, o200k, gpt4, gpt4o, gpt35, claude3, heuristic).
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,
    },

    /// Check tokenizer backends and configuration.
    Doctor,
}

/// Token count for one input, as printed by `tokens`
#[derive(Debug, Serialize)]
struct TokenRecord {
    path: String,
    tokens: usize,
    exact: bool,
    encoding: &'static str,
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let format: OutputFormat = cli
        .format
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let render_config = RenderConfig::with_pretty(format, cli.pretty);

    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Root directory not found: {}", cli.root.display()))?;

    let config_path = cli.config.as_deref();
    let load_config = || Config::load(config_path, &root).context("Failed to load config");

    match cli.command {
        Commands::Scan {
            max_depth,
            ignore,
            no_default_ignores,
            hide_ignored,
            model,
            repeat,
            stats,
        } => {
            let config = with_model(load_config()?, model.as_deref())?;
            let mut options = ScanOptions::from(&config.scan);
            apply_scan_flags(&mut options, max_depth, ignore, no_default_ignores);
            run_scan(
                &root,
                &config,
                options,
                render_config.hide_ignored(hide_ignored),
                repeat.max(1),
                stats,
            )
        }

        Commands::Tokens { files, model } => {
            let config = with_model(load_config()?, model.as_deref())?;
            run_tokens(&root, &config, &files, render_config)
        }

        Commands::Export {
            output,
            max_depth,
            ignore,
            only,
            model,
        } => {
            let config = with_model(load_config()?, model.as_deref())?;
            let mut options = ScanOptions::from(&config.scan);
            apply_scan_flags(&mut options, max_depth, ignore, false);
            run_export(&root, &config, options, only, output.as_deref())
        }

        // A broken config is reported by the doctor, not fatal to it.
        Commands::Doctor => {
            let model = Config::load(config_path, &root)
                .map(|config| config.tokenizer.model)
                .unwrap_or_default();
            run_doctor(&root, config_path, model, format, cli.pretty)
        }
    }
}

fn with_model(mut config: Config, model: Option<&str>) -> Result<Config> {
    if let Some(model) = model {
        config.tokenizer.model = model.parse::<TokenModel>().map_err(|e| anyhow!(e))?;
    }
    Ok(config)
}

fn apply_scan_flags(
    options: &mut ScanOptions,
    max_depth: Option<usize>,
    ignore: Vec<String>,
    no_default_ignores: bool,
) {
    if max_depth.is_some() {
        options.max_depth = max_depth;
    }
    options.ignore.extend(ignore);
    if no_default_ignores {
        options.default_ignores = false;
    }
}

/// Run one scan through the session's task runner, logging progress events
fn scan_in_background(session: &Session, root: &Path, options: ScanOptions) -> Result<ScanReport> {
    let handle = session.submit_scan(root, options)?;
    let runner = session.runner();

    loop {
        match runner.next_event(Duration::from_millis(100)) {
            Some(TaskEvent::Progress { progress, .. }) => {
                tracing::debug!(
                    processed = progress.processed,
                    total = progress.estimated_total,
                    path = ?progress.current_path,
                    "scan progress"
                );
            }
            Some(TaskEvent::Finished { id, .. }) if id == handle.id() => break,
            Some(_) => {}
            None if handle.is_finished() => break,
            None => {}
        }
    }

    match runner.wait(handle) {
        TaskOutcome::Completed(report) => Ok(report),
        TaskOutcome::Cancelled(report) => {
            tracing::warn!("scan was cancelled, output is partial");
            Ok(report)
        }
        TaskOutcome::Failed(err) => Err(err).context("Scan failed"),
    }
}

fn run_scan(
    root: &Path,
    config: &Config,
    options: ScanOptions,
    render_config: RenderConfig,
    repeat: usize,
    stats: bool,
) -> Result<()> {
    let session = Session::from_config(config).context("Invalid cache configuration")?;

    let mut last = None;
    for round in 1..=repeat {
        let report = scan_in_background(&session, root, options.clone())?;
        tracing::info!(
            round,
            tokens = report.total_tokens,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "scan round finished"
        );
        last = Some(report);
    }

    if let Some(report) = last {
        let renderer = Renderer::with_config(render_config);
        renderer
            .render_to(&report, std::io::stdout().lock())
            .context("Failed to write output")?;
    }

    if stats {
        eprintln!(
            "{}",
            render_stats(&session.cache().stats(), render_config.format, render_config.pretty)
        );
    }

    Ok(())
}

fn run_tokens(
    root: &Path,
    config: &Config,
    files: &[PathBuf],
    render_config: RenderConfig,
) -> Result<()> {
    let estimator = TokenEstimator::new(config.tokenizer.model);
    let read_config = FileReadConfig::with_max_file_size(config.scan.max_file_size);

    let mut records = Vec::new();
    if files.is_empty() {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        records.push(token_record("-".to_string(), &text, &estimator));
    }
    for file in files {
        let path = root.join(file);
        let text = read_text(&path, &read_config)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let shown = make_relative(&path, root).unwrap_or_else(|| normalize_path(file));
        records.push(token_record(shown, &text, &estimator));
    }

    let output = match render_config.format {
        OutputFormat::Jsonl => records
            .iter()
            .filter_map(|r| serde_json::to_string(r).ok())
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json if render_config.pretty => serde_json::to_string_pretty(&records)?,
        OutputFormat::Json => serde_json::to_string(&records)?,
        OutputFormat::Markdown | OutputFormat::Tree => {
            let mut out = String::from("| Input | Tokens | Encoding |\n|---|---:|---|\n");
            for r in &records {
                let exactness = if r.exact { "" } else { " (approximate)" };
                out.push_str(&format!(
                    "| `{}` | {} | {}{} |\n",
                    r.path, r.tokens, r.encoding, exactness
                ));
            }
            let total: usize = records.iter().map(|r| r.tokens).sum();
            out.push_str(&format!("| **total** | {} | |", total));
            out
        }
    };
    println!("{}", output);
    Ok(())
}

fn token_record(path: String, text: &str, estimator: &TokenEstimator) -> TokenRecord {
    let estimate = estimator.estimate_tagged(text);
    TokenRecord {
        path,
        tokens: estimate.tokens,
        exact: estimate.exact,
        encoding: estimator.encoding_name(),
    }
}

fn run_export(
    root: &Path,
    config: &Config,
    options: ScanOptions,
    only: Vec<String>,
    output: Option<&Path>,
) -> Result<()> {
    let session = Session::from_config(config).context("Invalid cache configuration")?;
    let export_options = ExportOptions {
        only,
        max_file_size: options.max_file_size,
    };
    let report = scan_in_background(&session, root, options)?;
    let document = export_markdown(&session.engine(), &report, &export_options);

    match output {
        Some(path) => {
            fs::write(path, &document)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), bytes = document.len(), "export written");
        }
        None => print!("{}", document),
    }
    Ok(())
}
