//! In-process [`Engine`] implementation.
//!
//! Documents live in memory. Change requests are queued on a channel and
//! applied by a single writer task, which gives per-document ordering for
//! free. After each request the writer notifies every subscription whose
//! document and filter match.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::document::{
    ChangeFilter, ChangeNotification, ChangeRequest, ChangeStatus, DocId, DocumentSnapshot,
};
use crate::engine::{Engine, Subscription};
use crate::error::{PipelineError, Result};
use crate::template::{PathRenderer, TemplateRenderer};

struct Subscriber {
    doc_id: DocId,
    filter: ChangeFilter,
    sender: mpsc::UnboundedSender<ChangeNotification>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: HashMap<u64, Subscriber>,
}

struct Inner {
    documents: RwLock<HashMap<DocId, DocumentSnapshot>>,
    subscribers: Mutex<Subscribers>,
    system: Value,
    renderer: Arc<dyn TemplateRenderer>,
}

impl Inner {
    fn apply(&self, request: &ChangeRequest) -> ChangeNotification {
        let mut documents = self.documents.write();
        let (version, status) = match documents.get_mut(&request.doc_id) {
            None => (0, ChangeStatus::Rejected("document not found".into())),
            Some(snapshot) => match snapshot.body.as_object_mut() {
                Some(map) => {
                    map.insert(request.field.clone(), request.value.clone());
                    snapshot.version += 1;
                    (snapshot.version, ChangeStatus::Applied)
                }
                None => (
                    snapshot.version,
                    ChangeStatus::Rejected("document root is not an object".into()),
                ),
            },
        };

        ChangeNotification {
            doc_id: request.doc_id.clone(),
            field: request.field.clone(),
            request_id: request.id,
            version,
            status,
        }
    }

    fn notify(&self, notification: &ChangeNotification) -> usize {
        let subscribers = self.subscribers.lock();
        let mut delivered = 0;
        for subscriber in subscribers.entries.values() {
            if subscriber.doc_id == notification.doc_id
                && subscriber.filter.matches(notification)
                && subscriber.sender.send(notification.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Engine that keeps documents in memory.
///
/// Must be created inside a Tokio runtime: construction spawns the writer task.
pub struct InMemoryEngine {
    inner: Arc<Inner>,
    requests: Mutex<Option<mpsc::UnboundedSender<ChangeRequest>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryEngine {
    /// Create an engine with the default [`PathRenderer`].
    pub fn new(system: Value) -> Self {
        Self::with_renderer(system, Arc::new(PathRenderer::new()))
    }

    /// Create an engine with a custom template renderer.
    pub fn with_renderer(system: Value, renderer: Arc<dyn TemplateRenderer>) -> Self {
        let inner = Arc::new(Inner {
            documents: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Subscribers::default()),
            system,
            renderer,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(inner.clone(), rx));

        Self {
            inner,
            requests: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Create a document with a generated id.
    pub fn create_document(&self, body: Value) -> Result<DocId> {
        let doc_id = DocId::generate();
        self.insert_document(doc_id.clone(), body)?;
        Ok(doc_id)
    }

    /// Create or replace a document under a known id.
    pub fn insert_document(&self, doc_id: DocId, body: Value) -> Result<()> {
        if !body.is_object() {
            return Err(PipelineError::Configuration(format!(
                "document '{}' must be a JSON object",
                doc_id
            )));
        }
        debug!(doc_id = %doc_id, "Document created");
        self.inner
            .documents
            .write()
            .insert(doc_id, DocumentSnapshot { version: 0, body });
        Ok(())
    }

    /// Current body of a document.
    pub fn document(&self, doc_id: &DocId) -> Option<Value> {
        self.inner
            .documents
            .read()
            .get(doc_id)
            .map(|snapshot| snapshot.body.clone())
    }

    /// Number of live subscriptions for a document.
    pub fn live_subscriptions(&self, doc_id: &DocId) -> usize {
        self.inner
            .subscribers
            .lock()
            .entries
            .values()
            .filter(|s| &s.doc_id == doc_id)
            .count()
    }

    /// Stop accepting change requests, finish the queued ones, and close
    /// every subscription stream.
    pub async fn shutdown(&self) {
        self.requests.lock().take();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer
            && let Err(e) = writer.await
        {
            warn!("Change writer task ended abnormally: {}", e);
        }
        self.inner.subscribers.lock().entries.clear();
    }
}

async fn run_writer(inner: Arc<Inner>, mut requests: mpsc::UnboundedReceiver<ChangeRequest>) {
    while let Some(request) = requests.recv().await {
        let notification = inner.apply(&request);
        match &notification.status {
            ChangeStatus::Applied => debug!(
                doc_id = %request.doc_id,
                field = %request.field,
                version = notification.version,
                "Change applied"
            ),
            ChangeStatus::Rejected(reason) => warn!(
                doc_id = %request.doc_id,
                field = %request.field,
                "Change rejected: {}",
                reason
            ),
        }
        let delivered = inner.notify(&notification);
        trace!(doc_id = %request.doc_id, delivered, "Change notification broadcast");
    }
}

#[async_trait]
impl Engine for InMemoryEngine {
    async fn get_document(&self, doc_id: &DocId) -> Result<DocumentSnapshot> {
        self.inner
            .documents
            .read()
            .get(doc_id)
            .cloned()
            .ok_or_else(|| PipelineError::DocumentNotFound(doc_id.to_string()))
    }

    fn system_config(&self) -> Value {
        self.inner.system.clone()
    }

    async fn publish_change_request(&self, request: ChangeRequest) -> Result<()> {
        let requests = self.requests.lock();
        let sender = requests.as_ref().ok_or(PipelineError::EngineClosed)?;
        sender.send(request).map_err(|_| PipelineError::EngineClosed)
    }

    fn subscribe(&self, doc_id: &DocId, filter: ChangeFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut subscribers = self.inner.subscribers.lock();
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            if self.requests.lock().is_some() {
                subscribers.entries.insert(
                    id,
                    Subscriber {
                        doc_id: doc_id.clone(),
                        filter: filter.clone(),
                        sender: tx,
                    },
                );
            }
            id
        };
        trace!(doc_id = %doc_id, subscription = id, "Subscribed to changes");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(doc_id.clone(), filter, rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().entries.remove(&id);
            }
        })
    }

    fn renderer(&self) -> Arc<dyn TemplateRenderer> {
        self.inner.renderer.clone()
    }
}
