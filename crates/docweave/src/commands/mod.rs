//! CLI command handlers.

pub mod run;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use docweave_config::DocweaveConfig;
use docweave_pipeline::{DEFAULT_TIMEOUT_MS, InMemoryEngine, PipelineFile, Step, StepRegistry};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Merged configuration.
    pub config: DocweaveConfig,
}

impl Context {
    /// Step registry with the built-in steps and the configured default timeout.
    pub fn registry(&self) -> StepRegistry {
        StepRegistry::with_builtins()
            .with_default_timeout(self.config.default_timeout_ms().unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// In-memory engine exposing the configured `[system]` table.
    pub fn engine(&self) -> Result<Arc<InMemoryEngine>> {
        let system = self.config.system_value()?;
        Ok(Arc::new(InMemoryEngine::new(system)))
    }
}

/// Parse a pipeline file and build its root step.
pub fn load_pipeline(
    ctx: &Context,
    path: &Path,
    engine: Arc<InMemoryEngine>,
) -> Result<(PipelineFile, Arc<dyn Step>)> {
    let file = PipelineFile::from_file(path)
        .with_context(|| format!("failed to load pipeline {}", path.display()))?;
    let root = ctx
        .registry()
        .build(&file.pipeline, engine)
        .with_context(|| format!("invalid pipeline '{}'", file.pipeline.name))?;
    Ok((file, root))
}
