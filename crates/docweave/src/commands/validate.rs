//! Validate command - checks a pipeline definition without running it.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::{Context, load_pipeline};

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Pipeline definition (.toml or .json)
    pub pipeline: PathBuf,
}

/// Validation result for JSON output.
#[derive(Debug, Serialize)]
struct ValidateOutput {
    valid: bool,
    name: String,
    steps: usize,
    default_timeout_ms: u64,
}

/// Run the validate command.
///
/// Builds every step, so unknown factory keys and `init` failures are
/// reported as well as structural problems.
pub async fn run(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine()?;
    let registry = ctx.registry();
    let (file, _root) = load_pipeline(ctx, &args.pipeline, engine.clone())?;
    engine.shutdown().await;

    let output = ValidateOutput {
        valid: true,
        name: file.pipeline.name.clone(),
        steps: file.pipeline.count(),
        default_timeout_ms: registry.default_timeout_ms(),
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let green = Style::new().green();
        let dim = Style::new().dim();
        println!(
            "{} {} {}",
            green.apply_to("✓"),
            style(format!("Pipeline '{}'", output.name)).bold(),
            dim.apply_to(format!(
                "is valid ({} steps, default timeout {}ms)",
                output.steps, output.default_timeout_ms
            ))
        );
    }

    Ok(())
}
