//! Incremental document construction for docweave.
//!
//! A pipeline is a tree of named steps run against one JSON document. Each
//! step may contribute a value to the document. A step whose input is not in
//! the document yet waits for the next document change and tries again;
//! sections run their children concurrently and finish once every child's
//! value has been applied.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Section                                                │
//! │  - Fans out to every child concurrently                 │
//! │  - Publishes registered values, waits for confirmation  │
//! │  - Fails fast on the first child error                  │
//! └─────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!       ┌────────────┐  ┌────────────┐  ┌────────────┐
//!       │ StepRunner │  │ StepRunner │  │  Section   │
//!       │ (retry SM) │  │ (retry SM) │  │  (nested)  │
//!       └────────────┘  └────────────┘  └────────────┘
//!              │
//!              ▼
//!       ┌─────────────┐      ┌──────────────────────────┐
//!       │ Environment │ ◀─── │ Engine (documents,       │
//!       │ (vars, doc, │      │ change requests,         │
//!       │  system)    │      │ notifications, renderer) │
//!       └─────────────┘      └──────────────────────────┘
//! ```
//!
//! # Core Components
//!
//! - [`StepRunner`]: attempt, wait for a change, retry; one result per execution
//! - [`Section`]: concurrent fan-out and confirmed fan-in
//! - [`Environment`]: per-attempt view with lazy template rendering
//! - [`Engine`]: document store collaborator; [`InMemoryEngine`] implements it
//! - [`StepRegistry`]: factory keys to constructors

pub mod definition;
pub mod document;
pub mod engine;
pub mod environment;
pub mod error;
pub mod factory;
pub mod memory;
pub mod runner;
pub mod section;
pub mod step;
pub mod steps;
pub mod template;

pub use definition::{DEFAULT_TIMEOUT_MS, PipelineFile, SECTION_FACTORY, StepConfig};
pub use document::{
    ChangeFilter, ChangeNotification, ChangeRequest, ChangeStatus, DocId, DocumentSnapshot,
};
pub use engine::{Engine, Subscription};
pub use environment::{DOC_KEY, Environment, SYSTEM_KEY};
pub use error::{PipelineError, Result};
pub use factory::{StepConstructor, StepRegistry};
pub use memory::InMemoryEngine;
pub use runner::{Phase, StepRunner};
pub use section::{Section, publish_and_confirm};
pub use step::{Attempt, AttemptError, AttemptFn, AttemptResult, FnLogic, Step, StepLogic, StepOutput};
pub use steps::{RENDER_FACTORY, RenderStep};
pub use template::{PathRenderer, RenderIssue, Rendered, Severity, TemplateRenderer, render_tree};
