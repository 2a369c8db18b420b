//! Composite step: concurrent fan-out over children, join on confirmed results.
//!
//! ```text
//!            ┌─▶ child a ──▶ Register{p} ──▶ publish ──▶ confirmed(p) ─┐
//! Section ───┼─▶ child b ──▶ Empty ─────────────────────────────────────┼──▶ joined
//!            └─▶ child c ──▶ Register{q} ──▶ publish ──▶ confirmed(q) ─┘
//! ```
//!
//! A child counts as complete only once its value has been applied to the
//! document, so a sibling that depends on it will observe it on its next
//! attempt. The first child error ends the section; children still running
//! are aborted and their results discarded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info_span, warn};

use crate::document::{ChangeFilter, ChangeNotification, ChangeRequest, ChangeStatus, DocId};
use crate::engine::Engine;
use crate::error::{PipelineError, Result};
use crate::step::{Step, StepOutput};

/// Publish a change request and wait until the engine reports its outcome.
///
/// The confirmation is matched on the request id and field, never on field
/// name alone, so two writes to the same field cannot be confused. The
/// subscription is in place before the request is published.
pub async fn publish_and_confirm(
    engine: &dyn Engine,
    request: ChangeRequest,
) -> Result<ChangeNotification> {
    let field = request.field.clone();
    let mut confirmation = engine.subscribe(
        &request.doc_id,
        ChangeFilter::Applied {
            field: field.clone(),
            request_id: request.id,
        },
    );
    engine.publish_change_request(request).await?;

    let notification = confirmation.next().await.ok_or(PipelineError::EngineClosed)?;
    confirmation.dispose();
    match notification.status {
        ChangeStatus::Applied => Ok(notification),
        ChangeStatus::Rejected(reason) => Err(PipelineError::ChangeRejected { field, reason }),
    }
}

/// Runs child steps concurrently and joins on their completion.
pub struct Section {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    engine: Arc<dyn Engine>,
}

impl Section {
    pub fn new(name: impl Into<String>, engine: Arc<dyn Engine>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            engine,
        }
    }

    pub fn with_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    async fn run(&self, doc_id: &DocId) -> Result<StepOutput> {
        let mut children = JoinSet::new();
        let mut names: HashMap<tokio::task::Id, String> = HashMap::with_capacity(self.steps.len());

        for step in &self.steps {
            let name = step.name().to_string();
            let step = step.clone();
            let engine = self.engine.clone();
            let doc_id = doc_id.clone();
            let handle = children.spawn(
                async move {
                    let outcome = complete_child(step.as_ref(), engine.as_ref(), &doc_id).await;
                    (step.name().to_string(), outcome)
                }
                .in_current_span(),
            );
            names.insert(handle.id(), name);
        }
        debug!(children = self.steps.len(), "Section started");

        let mut completed = 0usize;
        while let Some(joined) = children.join_next().await {
            let (child, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    children.abort_all();
                    let child = names
                        .remove(&e.id())
                        .unwrap_or_else(|| self.name.clone());
                    warn!(child = %child, "Section failed: child task died: {}", e);
                    return Err(PipelineError::ChildFailed {
                        source: Box::new(PipelineError::step(&child, format!("task failed: {}", e))),
                        step: child,
                    });
                }
            };
            if let Err(source) = outcome {
                children.abort_all();
                warn!(child = %child, "Section failed: {}", source);
                return Err(PipelineError::ChildFailed {
                    step: child,
                    source: Box::new(source),
                });
            }
            completed += 1;
            debug!(child = %child, completed, total = self.steps.len(), "Child complete");
        }

        Ok(StepOutput::Section {
            name: self.name.clone(),
        })
    }
}

/// Execute one child and, if it produced a value, wait for it to be applied.
async fn complete_child(step: &dyn Step, engine: &dyn Engine, doc_id: &DocId) -> Result<()> {
    match step.execute(doc_id).await? {
        StepOutput::Register { field, value } => {
            let request = ChangeRequest::new(doc_id.clone(), field, value);
            let notification = publish_and_confirm(engine, request).await?;
            debug!(
                child = %step.name(),
                field = %notification.field,
                version = notification.version,
                "Registered value confirmed"
            );
            Ok(())
        }
        StepOutput::Empty | StepOutput::Section { .. } => Ok(()),
    }
}

#[async_trait]
impl Step for Section {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_field(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, doc_id: &DocId) -> Result<StepOutput> {
        let span = info_span!("section", section = %self.name, doc_id = %doc_id);
        self.run(doc_id).instrument(span).await
    }
}

impl std::fmt::Debug for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("Section")
            .field("name", &self.name)
            .field("steps", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEngine;
    use serde_json::{Value, json};

    struct Fixed {
        name: &'static str,
        output: Option<(&'static str, Value)>,
    }

    #[async_trait]
    impl Step for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn register_field(&self) -> Option<&str> {
            self.output.as_ref().map(|(field, _)| *field)
        }

        async fn execute(&self, _doc_id: &DocId) -> Result<StepOutput> {
            Ok(match &self.output {
                Some((field, value)) => StepOutput::Register {
                    field: field.to_string(),
                    value: value.clone(),
                },
                None => StepOutput::Empty,
            })
        }
    }

    #[tokio::test]
    async fn test_empty_section_succeeds() {
        let engine = Arc::new(InMemoryEngine::new(json!({})));
        let doc = engine.create_document(json!({})).unwrap();
        let section = Section::new("empty", engine.clone());
        assert_eq!(
            section.execute(&doc).await.unwrap(),
            StepOutput::Section {
                name: "empty".into()
            }
        );
        assert_eq!(section.register_field(), None);
    }

    #[tokio::test]
    async fn test_registered_values_applied_before_join() {
        let engine = Arc::new(InMemoryEngine::new(json!({})));
        let doc = engine.create_document(json!({})).unwrap();
        let section = Section::new("s", engine.clone())
            .with_step(Arc::new(Fixed {
                name: "a",
                output: Some(("p", json!(1))),
            }))
            .with_step(Arc::new(Fixed {
                name: "b",
                output: None,
            }));

        section.execute(&doc).await.unwrap();
        assert_eq!(engine.document(&doc), Some(json!({"p": 1})));
        assert_eq!(engine.live_subscriptions(&doc), 0);
    }

    struct Panics;

    #[async_trait]
    impl Step for Panics {
        fn name(&self) -> &str {
            "boom_child"
        }

        fn register_field(&self) -> Option<&str> {
            None
        }

        async fn execute(&self, _doc_id: &DocId) -> Result<StepOutput> {
            panic!("kaboom");
        }
    }

    #[tokio::test]
    async fn test_panicking_child_keeps_its_name() {
        let engine = Arc::new(InMemoryEngine::new(json!({})));
        let doc = engine.create_document(json!({})).unwrap();
        let section = Section::new("outer", engine.clone())
            .with_step(Arc::new(Fixed {
                name: "fine",
                output: None,
            }))
            .with_step(Arc::new(Panics));

        let err = section.execute(&doc).await.unwrap_err();
        assert!(matches!(&err, PipelineError::ChildFailed { step, .. } if step == "boom_child"));
        assert_eq!(err.failed_step(), Some("boom_child"));
        assert!(err.to_string().contains("boom_child"));
    }

    #[tokio::test]
    async fn test_publish_and_confirm_rejected() {
        let engine = InMemoryEngine::new(json!({}));
        let request = ChangeRequest::new(DocId::new("ghost"), "p", json!(1));
        let err = publish_and_confirm(&engine, request).await.unwrap_err();
        assert!(matches!(err, PipelineError::ChangeRejected { field, .. } if field == "p"));
    }

    #[tokio::test]
    async fn test_publish_after_shutdown() {
        let engine = InMemoryEngine::new(json!({}));
        let doc = engine.create_document(json!({})).unwrap();
        engine.shutdown().await;
        let err = publish_and_confirm(&engine, ChangeRequest::new(doc, "p", json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EngineClosed));
    }
}
