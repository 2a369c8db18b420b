//! Error types for step execution and pipeline construction.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or executing a pipeline.
///
/// A step that cannot proceed yet is not an error; it reports
/// [`Attempt::Pending`](crate::step::Attempt::Pending) instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A single attempt overran its `timeout_ms`.
    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    Timeout { step: String, timeout_ms: u64 },

    /// Attempt logic failed for a reason other than a missing dependency.
    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },

    /// A child of a section failed. Wraps the child's error unchanged.
    #[error("Step '{step}' failed: {source}")]
    ChildFailed {
        step: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// Invalid pipeline definition or step initialization failure.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The engine has no document with this id.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// The engine refused to apply a change request.
    #[error("Change to field '{field}' was rejected: {reason}")]
    ChangeRejected { field: String, reason: String },

    /// The notification stream ended while a step or section was waiting on it.
    #[error("Engine closed while waiting for document changes")]
    EngineClosed,

    /// A pipeline file could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Filesystem error while reading a pipeline file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Build a [`PipelineError::Step`] for the named step.
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Name of the innermost step that failed, when known.
    ///
    /// Walks through nested [`PipelineError::ChildFailed`] wrappers so a
    /// failure three sections deep still names the leaf step.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::ChildFailed { source, step } => source.failed_step().or(Some(step)),
            Self::Timeout { step, .. } | Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The original error with every section wrapper removed.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            Self::ChildFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Names of the steps from the outermost wrapper down to the failure.
    pub fn step_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self;
        while let Self::ChildFailed { step, source } = current {
            path.push(step.as_str());
            current = source;
        }
        if let Self::Timeout { step, .. } | Self::Step { step, .. } = current
            && path.last() != Some(&step.as_str())
        {
            path.push(step.as_str());
        }
        path
    }

    /// Whether this failure (or its root cause) is a per-attempt timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Timeout { .. })
    }
}
