//! contextor - Scan a project, estimate its LLM token cost and export it as context
//!
//! contextor provides:
//! - Cached directory scans with configurable ignore rules
//! - Exact (tiktoken) or heuristic token counts per file
//! - Cancellable background scans with progress reporting
//! - Unified output format (jsonl/json/md/tree) and Markdown export

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use contextor::cli;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    cli::run(cli)
}

/// Log to stderr so stdout stays clean for results
fn init_logging(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "contextor=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
