//! Run command - executes a pipeline against a fresh document.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::{Style, style};
use docweave_pipeline::{ChangeRequest, Step, publish_and_confirm};
use serde_json::Value;

use super::{Context, load_pipeline};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline definition (.toml or .json)
    pub pipeline: PathBuf,

    /// Initial document as a JSON file (default: empty object)
    #[arg(long)]
    pub doc: Option<PathBuf>,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let body = initial_document(args.doc.as_deref())?;
    let engine = ctx.engine()?;
    let (file, root) = load_pipeline(ctx, &args.pipeline, engine.clone())?;
    let initial_fields: Vec<String> = body
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();
    let doc_id = engine.create_document(body)?;

    tracing::info!(pipeline = %file.pipeline.name, doc_id = %doc_id, "Running pipeline");
    let started = Instant::now();
    let outcome = root.execute(&doc_id).await;

    let outcome = match outcome {
        // A leaf at the root registers its own value.
        Ok(output) => match output.registration() {
            Some((field, value)) => {
                let request = ChangeRequest::new(doc_id.clone(), field, value.clone());
                publish_and_confirm(engine.as_ref(), request).await.map(|_| ())
            }
            None => Ok(()),
        },
        Err(e) => Err(e),
    };
    let elapsed = started.elapsed();
    let document = engine.document(&doc_id).unwrap_or(Value::Null);
    engine.shutdown().await;

    if let Err(e) = outcome {
        let at = e
            .failed_step()
            .map(|step| format!(" at step '{}'", step))
            .unwrap_or_default();
        return Err(anyhow::Error::new(e)
            .context(format!("pipeline '{}' failed{}", file.pipeline.name, at)));
    }

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    let green = Style::new().green();
    let dim = Style::new().dim();

    println!();
    println!(
        "{} {}",
        green.apply_to("✓"),
        style(format!("Pipeline '{}' complete", file.pipeline.name)).bold()
    );
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Document:"), doc_id);
    println!("  {} {}", dim.apply_to("Steps:"), file.pipeline.count());
    println!("  {} {:.1?}", dim.apply_to("Elapsed:"), elapsed);
    if ctx.verbose
        && let Some(map) = document.as_object()
    {
        let added: Vec<&str> = map
            .keys()
            .filter(|k| !initial_fields.contains(*k))
            .map(String::as_str)
            .collect();
        println!("  {} {}", dim.apply_to("Registered:"), added.join(", "));
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&document)?);
    println!();

    Ok(())
}

fn initial_document(path: Option<&std::path::Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(Value::Object(Default::default()));
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read document {}", path.display()))?;
    let body: Value = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    if !body.is_object() {
        bail!("{} must contain a JSON object", path.display());
    }
    Ok(body)
}
