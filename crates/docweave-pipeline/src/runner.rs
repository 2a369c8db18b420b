//! Retry state machine that turns [`StepLogic`] into a [`Step`].
//!
//! ```text
//!                 Ready              ┌───────────┐
//!   ┌──────────┐ ─────────────────▶ │ Succeeded │
//!   │Attempting│ ── attempt error ▶ │  Failed   │
//!   └──────────┘ ── overran ──────▶ │ TimedOut  │
//!     │      ▲                       └───────────┘
//!   Pending  │ change notification
//!     ▼      │
//!   ┌──────────────────┐
//!   │ WaitingForChange │   (no timer; only a document change wakes it)
//!   └──────────────────┘
//! ```
//!
//! `timeout_ms` bounds each attempt on its own. Time spent waiting for a
//! document change is never counted, so a step that is woken up many times
//! by unrelated changes never times out as long as each attempt is quick.
//!
//! A timed-out attempt's future is dropped, which stops it at its next await
//! point. Work it spawned elsewhere, or a blocking call inside it, keeps
//! running; the timeout only decides the step's outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{Instrument, debug, info_span, trace, warn};

use crate::definition::StepConfig;
use crate::document::{ChangeFilter, DocId};
use crate::engine::{Engine, Subscription};
use crate::environment::Environment;
use crate::error::{PipelineError, Result};
use crate::step::{Attempt, Step, StepLogic, StepOutput};

/// Phase of one outstanding execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Attempting,
    WaitingForChange,
    Succeeded,
    TimedOut,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::TimedOut | Self::Failed)
    }
}

/// State of one `(step, document)` execution.
///
/// Holds at most one change subscription. [`Execution::finish`] consumes the
/// execution, so its result can be produced only once.
struct Execution<'a> {
    step: &'a str,
    doc_id: &'a DocId,
    phase: Phase,
    subscription: Option<Subscription>,
    attempts: u32,
}

impl<'a> Execution<'a> {
    fn new(step: &'a str, doc_id: &'a DocId) -> Self {
        Self {
            step,
            doc_id,
            phase: Phase::Attempting,
            subscription: None,
            attempts: 0,
        }
    }

    fn transition(&mut self, next: Phase) {
        trace!(from = ?self.phase, to = ?next, "Step phase change");
        self.phase = next;
    }

    fn finish(mut self, phase: Phase, result: Result<StepOutput>) -> Result<StepOutput> {
        self.transition(phase);
        if let Some(subscription) = self.subscription.take() {
            subscription.dispose();
        }
        match &result {
            Ok(_) => debug!(attempts = self.attempts, "Step succeeded"),
            Err(e) => warn!(
                step = %self.step,
                doc_id = %self.doc_id,
                attempts = self.attempts,
                "Step ended with {:?}: {}",
                phase,
                e
            ),
        }
        result
    }
}

/// Wraps a step's single-attempt logic with timeout, dependency wait, and
/// exactly-once result delivery.
pub struct StepRunner<L> {
    name: String,
    vars: Map<String, Value>,
    timeout_ms: u64,
    register: Option<String>,
    engine: Arc<dyn Engine>,
    logic: L,
}

impl<L: StepLogic> StepRunner<L> {
    /// Build a runner from its configuration. Calls [`StepLogic::init`] once.
    pub fn new(engine: Arc<dyn Engine>, config: &StepConfig, mut logic: L) -> Result<Self> {
        logic.init(&engine, config)?;
        Ok(Self {
            name: config.name.clone(),
            vars: config.vars.clone(),
            timeout_ms: config.effective_timeout_ms(),
            register: config.register.clone(),
            engine,
            logic,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    async fn run(&self, doc_id: &DocId) -> Result<StepOutput> {
        let mut execution = Execution::new(&self.name, doc_id);

        loop {
            match execution.phase {
                Phase::Attempting => {
                    // Anything queued is already reflected in the snapshot we
                    // are about to read.
                    if let Some(subscription) = execution.subscription.as_mut() {
                        subscription.drain();
                    }

                    let env = match Environment::load(self.engine.as_ref(), doc_id, &self.vars).await
                    {
                        Ok(env) => env,
                        Err(e) => return execution.finish(Phase::Failed, Err(e)),
                    };
                    let version = env.version();
                    execution.attempts += 1;
                    trace!(attempt = execution.attempts, version, "Attempting step");

                    let outcome = tokio::time::timeout(self.timeout(), self.logic.attempt(&env)).await;
                    match outcome {
                        Err(_) => {
                            let err = PipelineError::Timeout {
                                step: self.name.clone(),
                                timeout_ms: self.timeout_ms,
                            };
                            return execution.finish(Phase::TimedOut, Err(err));
                        }
                        Ok(Err(e)) => {
                            let err = PipelineError::step(&self.name, e.message());
                            return execution.finish(Phase::Failed, Err(err));
                        }
                        Ok(Ok(Attempt::Ready(value))) => {
                            let output = self.output(value);
                            return execution.finish(Phase::Succeeded, Ok(output));
                        }
                        Ok(Ok(Attempt::Pending(reason))) => {
                            debug!(reason = %reason, version, "Step waiting for a document change");
                            if execution.subscription.is_none() {
                                execution.subscription =
                                    Some(self.engine.subscribe(doc_id, ChangeFilter::Any));
                                // A change applied between our read and the
                                // subscription would never be announced to us.
                                match self.engine.get_document(doc_id).await {
                                    Ok(current) if current.version != version => {
                                        trace!(
                                            current = current.version,
                                            "Document changed before subscription, retrying"
                                        );
                                        continue;
                                    }
                                    Ok(_) => {}
                                    Err(e) => return execution.finish(Phase::Failed, Err(e)),
                                }
                            }
                            execution.transition(Phase::WaitingForChange);
                        }
                    }
                }
                Phase::WaitingForChange => {
                    let Some(subscription) = execution.subscription.as_mut() else {
                        execution.transition(Phase::Attempting);
                        continue;
                    };
                    match subscription.next().await {
                        Some(notification) => {
                            trace!(
                                field = %notification.field,
                                version = notification.version,
                                "Document changed"
                            );
                            execution.transition(Phase::Attempting);
                        }
                        None => {
                            return execution.finish(Phase::Failed, Err(PipelineError::EngineClosed));
                        }
                    }
                }
                Phase::Succeeded | Phase::TimedOut | Phase::Failed => {
                    unreachable!("terminal phases return from finish()")
                }
            }
        }
    }

    fn output(&self, value: Option<Value>) -> StepOutput {
        match (self.register.as_ref(), value) {
            (Some(field), Some(value)) => StepOutput::Register {
                field: field.clone(),
                value,
            },
            (None, Some(_)) => {
                trace!("No register field; value discarded");
                StepOutput::Empty
            }
            (_, None) => StepOutput::Empty,
        }
    }
}

#[async_trait]
impl<L: StepLogic> Step for StepRunner<L> {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_field(&self) -> Option<&str> {
        self.register.as_deref()
    }

    async fn execute(&self, doc_id: &DocId) -> Result<StepOutput> {
        let span = info_span!("step", step = %self.name, doc_id = %doc_id);
        self.run(doc_id).instrument(span).await
    }
}

impl<L> std::fmt::Debug for StepRunner<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("name", &self.name)
            .field("timeout_ms", &self.timeout_ms)
            .field("register", &self.register)
            .finish_non_exhaustive()
    }
}
