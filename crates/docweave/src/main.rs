//! docweave - incremental document pipelines
//!
//! Main entry point for the docweave CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

mod commands;

use commands::{run, validate};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// docweave - build JSON documents from pipelines of dependent steps
#[derive(Parser)]
#[command(name = "docweave")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// User config directory (default: platform config dir)
    #[arg(long, global = true, env = "DOCWEAVE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline against a new document
    Run(run::RunArgs),

    /// Check a pipeline definition without running it
    Validate(validate::ValidateArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = docweave_config::load_config_with_options(None, cli.config_dir.as_deref())?;
    let _guard = init_tracing(&loaded.config, cli.verbose, cli.config_dir.as_deref());

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    for path in loaded.loaded_from() {
        tracing::debug!(path = %path.display(), "Loaded config layer");
    }

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config: loaded.config,
    };

    match cli.command {
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Validate(args) => validate::run(args, &ctx).await,
    }
}

/// Console layer on stderr, plus a daily rolling JSON file when enabled.
fn init_tracing(
    config: &docweave_config::DocweaveConfig,
    verbose: bool,
    config_dir: Option<&std::path::Path>,
) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let console_filter = if verbose {
        "docweave=debug,docweave_pipeline=debug,docweave_config=debug,warn".to_string()
    } else {
        crate_filter(config.log_level())
    };

    let (file_layer, guard) = if config.file_logging() {
        let log_dir = config
            .log_dir()
            .cloned()
            .or_else(|| config_dir.map(|d| d.join("logs")))
            .or_else(|| docweave_config::xdg_config_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "docweave.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(tracing_subscriber::EnvFilter::new(
                "docweave=trace,docweave_pipeline=trace,docweave_config=trace,info",
            ));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(console_filter)),
        )
        .with(file_layer)
        .init();

    guard
}

/// A bare level applies to the docweave crates only; anything more specific
/// is used as a filter directive unchanged.
fn crate_filter(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("docweave={level},docweave_pipeline={level},docweave_config={level},warn")
    }
}
