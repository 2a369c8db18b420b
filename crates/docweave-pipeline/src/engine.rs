//! The engine collaborator consumed by steps and sections.
//!
//! The engine owns every document. It applies change requests one at a time
//! per document, in submission order, and broadcasts a
//! [`ChangeNotification`] after each one. Steps only read snapshots and
//! subscribe to notifications.
//!
//! Guarantees relied upon by [`StepRunner`](crate::runner::StepRunner) and
//! [`Section`](crate::section::Section):
//! - change requests for one document are applied and announced in the order
//!   they were published;
//! - a subscription registered before a change is applied observes it;
//! - nothing is guaranteed across different documents.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::document::{ChangeFilter, ChangeNotification, ChangeRequest, DocId, DocumentSnapshot};
use crate::error::Result;
use crate::template::TemplateRenderer;

/// Document store, change applier, and notification source.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Current snapshot of a document.
    async fn get_document(&self, doc_id: &DocId) -> Result<DocumentSnapshot>;

    /// System configuration exposed to every step as `system`.
    fn system_config(&self) -> Value;

    /// Ask the engine to merge `request.field = request.value` into the document.
    ///
    /// Returns once the request is queued, not once it is applied. Watch for
    /// the outcome with [`ChangeFilter::Applied`].
    async fn publish_change_request(&self, request: ChangeRequest) -> Result<()>;

    /// Subscribe to notifications for one document.
    fn subscribe(&self, doc_id: &DocId, filter: ChangeFilter) -> Subscription;

    /// Template rendering service used by environments.
    fn renderer(&self) -> Arc<dyn TemplateRenderer>;
}

type Disposer = Box<dyn FnOnce() + Send + Sync>;

/// A live stream of change notifications for one document.
///
/// Dropping the subscription disposes it.
pub struct Subscription {
    doc_id: DocId,
    filter: ChangeFilter,
    receiver: mpsc::UnboundedReceiver<ChangeNotification>,
    disposer: Option<Disposer>,
}

impl Subscription {
    /// Wrap a receiver fed by an engine. `disposer` runs exactly once, when
    /// the subscription is disposed or dropped.
    pub fn new(
        doc_id: DocId,
        filter: ChangeFilter,
        receiver: mpsc::UnboundedReceiver<ChangeNotification>,
        disposer: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            doc_id,
            filter,
            receiver,
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Wait for the next notification. `None` once the engine is gone.
    pub async fn next(&mut self) -> Option<ChangeNotification> {
        self.receiver.recv().await
    }

    /// Discard notifications that are already queued. Returns how many.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.receiver.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    /// Stop receiving notifications.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("doc_id", &self.doc_id)
            .field("filter", &self.filter)
            .finish()
    }
}
