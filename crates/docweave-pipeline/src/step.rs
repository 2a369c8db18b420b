//! Step capability traits.
//!
//! Two levels of abstraction:
//!
//! - [`Step`] is what a [`Section`](crate::section::Section) drives: execute
//!   against a document id and eventually yield one [`StepOutput`].
//! - [`StepLogic`] is a single attempt: read an [`Environment`], return an
//!   [`Attempt`]. Wrapping it in a [`StepRunner`](crate::runner::StepRunner)
//!   adds the timeout, dependency wait, and retry behaviour.
//!
//! New step types implement [`StepLogic`] (or [`Step`] directly for
//! composites) and are registered with a
//! [`StepRegistry`](crate::factory::StepRegistry) under a factory key.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::definition::StepConfig;
use crate::document::DocId;
use crate::engine::Engine;
use crate::environment::Environment;
use crate::error::Result;

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    /// Finished, with or without a value.
    Ready(Option<Value>),
    /// Required data is not in the document yet. Retry after the next change.
    Pending(String),
}

impl Attempt {
    pub fn ready(value: impl Into<Value>) -> Self {
        Self::Ready(Some(value.into()))
    }

    /// Finished without producing a value.
    pub fn done() -> Self {
        Self::Ready(None)
    }

    pub fn pending(reason: impl Into<String>) -> Self {
        Self::Pending(reason.into())
    }
}

/// Failure raised by attempt logic. The runner attaches the step name.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct AttemptError(String);

impl AttemptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for AttemptError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for AttemptError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for AttemptError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Result of a single attempt.
pub type AttemptResult = std::result::Result<Attempt, AttemptError>;

/// Final result of executing a step against one document.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// A value to be stored in the document under `field`.
    Register { field: String, value: Value },
    /// Finished without contributing to the document.
    Empty,
    /// A section joined all of its children.
    Section { name: String },
}

impl StepOutput {
    /// The `(field, value)` pair to write to the document, if any.
    pub fn registration(&self) -> Option<(&str, &Value)> {
        match self {
            Self::Register { field, value } => Some((field, value)),
            _ => None,
        }
    }
}

/// A unit of work that can be executed against a document.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Document field that receives this step's value, if any.
    fn register_field(&self) -> Option<&str>;

    /// Run until a terminal outcome for `doc_id`.
    async fn execute(&self, doc_id: &DocId) -> Result<StepOutput>;
}

/// Single-attempt logic of a leaf step.
///
/// `attempt` may be called many times for the same document. It must not
/// have side effects beyond returning a result; a later call may return a
/// different result because the document changed.
#[async_trait]
pub trait StepLogic: Send + Sync {
    /// One-time setup before first use. The engine handle is the one the
    /// step will run against.
    fn init(&mut self, _engine: &Arc<dyn Engine>, _config: &StepConfig) -> Result<()> {
        Ok(())
    }

    async fn attempt(&self, env: &Environment) -> AttemptResult;
}

/// Async closure form of [`StepLogic::attempt`].
pub type AttemptFn =
    Arc<dyn Fn(Environment) -> Pin<Box<dyn Future<Output = AttemptResult> + Send>> + Send + Sync>;

/// [`StepLogic`] backed by a closure.
#[derive(Clone)]
pub struct FnLogic {
    attempt_fn: AttemptFn,
}

impl FnLogic {
    pub fn new(attempt_fn: AttemptFn) -> Self {
        Self { attempt_fn }
    }

    /// Build from any async closure without spelling out the boxing.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Environment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AttemptResult> + Send + 'static,
    {
        Self::new(Arc::new(move |env| Box::pin(f(env))))
    }
}

#[async_trait]
impl StepLogic for FnLogic {
    async fn attempt(&self, env: &Environment) -> AttemptResult {
        (self.attempt_fn)(env.clone()).await
    }
}

impl std::fmt::Debug for FnLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnLogic").finish_non_exhaustive()
    }
}
