//! Built-in step logic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::definition::StepConfig;
use crate::engine::Engine;
use crate::environment::Environment;
use crate::error::{PipelineError, Result};
use crate::step::{Attempt, AttemptError, AttemptResult, StepLogic};
use crate::template::Rendered;

/// Factory key of [`RenderStep`].
pub const RENDER_FACTORY: &str = "render";

/// Variable rendered by [`RenderStep`].
pub const RENDER_VALUE_VAR: &str = "value";

/// Produces its rendered `value` variable.
///
/// Objects and arrays are rendered leaf by leaf. If any template refers to
/// document data that is not there yet the step waits for it.
#[derive(Debug, Default)]
pub struct RenderStep;

impl RenderStep {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepLogic for RenderStep {
    fn init(&mut self, _engine: &Arc<dyn Engine>, config: &StepConfig) -> Result<()> {
        if !config.vars.contains_key(RENDER_VALUE_VAR) {
            return Err(PipelineError::Configuration(format!(
                "step '{}' ({}) requires a '{}' var",
                config.name, RENDER_FACTORY, RENDER_VALUE_VAR
            )));
        }
        Ok(())
    }

    async fn attempt(&self, env: &Environment) -> AttemptResult {
        let rendered = env
            .try_get(RENDER_VALUE_VAR)
            .ok_or_else(|| AttemptError::new(format!("'{}' var is missing", RENDER_VALUE_VAR)))?;

        match rendered {
            Rendered::Output { value, warnings } => {
                let missing: Vec<&str> = warnings
                    .iter()
                    .filter_map(|issue| issue.missing_path.as_deref())
                    .collect();
                if missing.is_empty() {
                    return Ok(Attempt::Ready(Some(value)));
                }
                // Only the document changes between attempts.
                let (pending, never): (Vec<&str>, Vec<&str>) =
                    missing.into_iter().partition(|path| is_document_path(path));
                if !never.is_empty() {
                    return Err(AttemptError::new(format!(
                        "unresolved paths outside the document: {}",
                        never.join(", ")
                    )));
                }
                trace!(missing = ?pending, "Render waiting for document data");
                Ok(Attempt::pending(format!("missing {}", pending.join(", "))))
            }
            Rendered::Fatal(issues) => {
                let messages: Vec<String> = issues.iter().map(ToString::to_string).collect();
                Err(AttemptError::new(messages.join("; ")))
            }
        }
    }
}

fn is_document_path(path: &str) -> bool {
    path == "doc" || path.starts_with("doc.") || path.starts_with("doc[")
}
