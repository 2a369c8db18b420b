//! Factory registry that turns [`StepConfig`] trees into executable steps.
//!
//! Each factory key maps to a constructor. Leaf constructors are usually
//! registered with [`StepRegistry::register_logic`], which wraps the produced
//! [`StepLogic`] in a [`StepRunner`]. The `section` constructor recurses back
//! into the registry for its children.
//!
//! ```rust,ignore
//! let mut registry = StepRegistry::with_builtins();
//! registry.register_logic("double", || MyDoubleStep::default());
//! let root = registry.build(&file.pipeline, engine.clone())?;
//! let output = root.execute(&doc_id).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::definition::{DEFAULT_TIMEOUT_MS, SECTION_FACTORY, StepConfig};
use crate::engine::Engine;
use crate::error::{PipelineError, Result};
use crate::runner::StepRunner;
use crate::section::Section;
use crate::step::{Step, StepLogic};
use crate::steps::{RENDER_FACTORY, RenderStep};

/// Builds one step from its configuration.
///
/// Receives the registry so composite steps can build their children.
pub type StepConstructor =
    Arc<dyn Fn(&StepRegistry, &StepConfig, Arc<dyn Engine>) -> Result<Arc<dyn Step>> + Send + Sync>;

/// Registry mapping factory keys to step constructors.
#[derive(Clone)]
pub struct StepRegistry {
    constructors: HashMap<String, StepConstructor>,
    default_timeout_ms: u64,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Create a registry with the `section` and `render` steps.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(SECTION_FACTORY, Arc::new(build_section));
        registry.register_logic(RENDER_FACTORY, RenderStep::new);
        registry
    }

    /// Timeout applied to nodes that do not set `timeout_ms`.
    pub fn with_default_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }

    /// Register a raw constructor. Replaces any existing one for `key`.
    pub fn register(&mut self, key: impl Into<String>, constructor: StepConstructor) {
        self.constructors.insert(key.into(), constructor);
    }

    /// Register leaf step logic. Every built instance gets a fresh `L`,
    /// initialised once from its configuration.
    pub fn register_logic<L, F>(&mut self, key: impl Into<String>, make: F)
    where
        L: StepLogic + 'static,
        F: Fn() -> L + Send + Sync + 'static,
    {
        self.register(
            key,
            Arc::new(
                move |_registry: &StepRegistry,
                      config: &StepConfig,
                      engine: Arc<dyn Engine>|
                      -> Result<Arc<dyn Step>> {
                    let runner = StepRunner::new(engine, config, make())?;
                    Ok(Arc::new(runner))
                },
            ),
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    /// Registered factory keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Validate a definition tree and build its root step.
    ///
    /// Fails with [`PipelineError::Configuration`] before anything runs if
    /// the tree is invalid, a factory key is unknown, or a step's `init`
    /// rejects its configuration.
    pub fn build(&self, config: &StepConfig, engine: Arc<dyn Engine>) -> Result<Arc<dyn Step>> {
        let mut config = config.clone();
        config.apply_default_timeout(self.default_timeout_ms);
        config.validate()?;
        let step = self.build_node(&config, engine)?;
        debug!(pipeline = %config.name, steps = config.count(), "Pipeline built");
        Ok(step)
    }

    /// Build one node without re-validating. Used by composite constructors.
    pub fn build_node(&self, config: &StepConfig, engine: Arc<dyn Engine>) -> Result<Arc<dyn Step>> {
        let constructor = self.constructors.get(&config.factory).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "step '{}' uses unknown factory '{}' (known: {})",
                config.name,
                config.factory,
                self.keys().join(", ")
            ))
        })?;
        constructor(self, config, engine)
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("keys", &self.keys())
            .field("default_timeout_ms", &self.default_timeout_ms)
            .finish()
    }
}

fn build_section(
    registry: &StepRegistry,
    config: &StepConfig,
    engine: Arc<dyn Engine>,
) -> Result<Arc<dyn Step>> {
    let mut section = Section::new(&config.name, engine.clone());
    for child in &config.steps {
        section = section.with_step(registry.build_node(child, engine.clone())?);
    }
    Ok(Arc::new(section))
}
