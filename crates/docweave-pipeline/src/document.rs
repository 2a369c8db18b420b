//! Document, change request, and change notification types.
//!
//! These are the messages exchanged between the step machinery and the
//! [`Engine`](crate::engine::Engine). Steps never mutate a document; they ask
//! the engine to apply a [`ChangeRequest`] and learn about applied changes
//! through [`ChangeNotification`]s.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque identifier of a document under construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A point-in-time copy of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Number of changes applied to the document so far.
    pub version: u64,
    /// The document tree.
    pub body: Value,
}

/// Request to merge one field into a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Correlates this request with its confirmation.
    pub id: Uuid,
    pub doc_id: DocId,
    pub field: String,
    pub value: Value,
}

impl ChangeRequest {
    pub fn new(doc_id: DocId, field: impl Into<String>, value: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            doc_id,
            field: field.into(),
            value,
        }
    }
}

/// Outcome of applying a change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ChangeStatus {
    Applied,
    Rejected(String),
}

/// Broadcast by the engine after it has processed a change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub doc_id: DocId,
    pub field: String,
    pub request_id: Uuid,
    /// Document version after the change. Unchanged when rejected.
    pub version: u64,
    pub status: ChangeStatus,
}

impl ChangeNotification {
    pub fn is_applied(&self) -> bool {
        self.status == ChangeStatus::Applied
    }
}

/// Which notifications a subscription receives, beyond the document id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilter {
    /// Every applied change to the document.
    Any,
    /// Only the outcome of one specific change request for one field.
    Applied { field: String, request_id: Uuid },
}

impl ChangeFilter {
    /// Whether a notification for the subscribed document passes this filter.
    pub fn matches(&self, notification: &ChangeNotification) -> bool {
        match self {
            Self::Any => notification.is_applied(),
            Self::Applied { field, request_id } => {
                notification.request_id == *request_id && notification.field == *field
            }
        }
    }
}
