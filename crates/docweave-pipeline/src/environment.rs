//! Per-attempt input to a step.
//!
//! An [`Environment`] combines the step's declared variables, a snapshot of
//! the document, and the system configuration into one JSON object:
//!
//! ```text
//! { <var>: ..., <var>: ..., "doc": { ... }, "system": { ... } }
//! ```
//!
//! Variable values are stored raw. Template strings inside them are rendered
//! only when read, against the same combined object. Document and system data
//! are returned verbatim and are never treated as templates.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::document::{DocId, DocumentSnapshot};
use crate::engine::Engine;
use crate::error::Result;
use crate::template::{Rendered, TemplateRenderer, navigate_segment, parse_path_segments, render_tree};

/// Root key under which the document snapshot is exposed.
pub const DOC_KEY: &str = "doc";

/// Root key under which the system configuration is exposed.
pub const SYSTEM_KEY: &str = "system";

/// Lazily rendered view over vars, document, and system config.
#[derive(Clone)]
pub struct Environment {
    doc_id: DocId,
    version: u64,
    root: Value,
    renderer: Arc<dyn TemplateRenderer>,
}

impl Environment {
    /// Assemble an environment from its parts.
    pub fn new(
        doc_id: DocId,
        vars: &Map<String, Value>,
        snapshot: DocumentSnapshot,
        system: Value,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        let mut root = vars.clone();
        root.insert(DOC_KEY.to_string(), snapshot.body);
        root.insert(SYSTEM_KEY.to_string(), system);
        Self {
            doc_id,
            version: snapshot.version,
            root: Value::Object(root),
            renderer,
        }
    }

    /// Fetch the current document from the engine and build an environment.
    pub async fn load(engine: &dyn Engine, doc_id: &DocId, vars: &Map<String, Value>) -> Result<Self> {
        let snapshot = engine.get_document(doc_id).await?;
        Ok(Self::new(
            doc_id.clone(),
            vars,
            snapshot,
            engine.system_config(),
            engine.renderer(),
        ))
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    /// Version of the document snapshot this environment was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn doc(&self) -> &Value {
        &self.root[DOC_KEY]
    }

    pub fn system(&self) -> &Value {
        &self.root[SYSTEM_KEY]
    }

    /// Look up a path without rendering templates.
    pub fn raw(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in &parse_path_segments(path) {
            current = navigate_segment(current, segment)?;
        }
        Some(current)
    }

    /// Look up a path, rendering any templates found under a variable.
    ///
    /// Returns `None` when the path does not exist. Otherwise the full
    /// rendering result is returned, so the caller can inspect warnings and
    /// fatal errors itself.
    pub fn try_get(&self, path: &str) -> Option<Rendered> {
        let raw = self.raw(path)?;
        if self.is_data_path(path) {
            return Some(Rendered::Output {
                value: raw.clone(),
                warnings: Vec::new(),
            });
        }
        Some(render_tree(self.renderer.as_ref(), raw, &self.root))
    }

    /// Look up a path and render it, logging any rendering problems.
    ///
    /// Warnings still yield the best available output; fatal rendering
    /// errors yield `None`.
    pub fn get(&self, path: &str) -> Option<Value> {
        match self.try_get(path)? {
            Rendered::Output { value, warnings } => {
                for issue in &warnings {
                    warn!(doc_id = %self.doc_id, path, "{}", issue);
                }
                Some(value)
            }
            Rendered::Fatal(issues) => {
                for issue in &issues {
                    error!(doc_id = %self.doc_id, path, "{}", issue);
                }
                None
            }
        }
    }

    /// Look up a path and only return it if it rendered without any issue.
    ///
    /// Useful for steps that treat a missing referenced field as "not ready".
    pub fn get_complete(&self, path: &str) -> Option<Value> {
        match self.try_get(path)? {
            Rendered::Output { value, warnings } if warnings.is_empty() => Some(value),
            _ => None,
        }
    }

    /// Convenience accessor for integer values.
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(|v| v.as_i64())
    }

    /// Convenience accessor for string values.
    pub fn get_str(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render every variable and return the whole environment as JSON.
    pub fn resolve_all(&self) -> Rendered {
        let Value::Object(map) = &self.root else {
            return Rendered::Output {
                value: self.root.clone(),
                warnings: Vec::new(),
            };
        };
        let vars: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| k.as_str() != DOC_KEY && k.as_str() != SYSTEM_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        match render_tree(self.renderer.as_ref(), &Value::Object(vars), &self.root) {
            Rendered::Output { value, warnings } => {
                let mut resolved = match value {
                    Value::Object(m) => m,
                    _ => Map::new(),
                };
                resolved.insert(DOC_KEY.to_string(), self.doc().clone());
                resolved.insert(SYSTEM_KEY.to_string(), self.system().clone());
                Rendered::Output {
                    value: Value::Object(resolved),
                    warnings,
                }
            }
            fatal => fatal,
        }
    }

    fn is_data_path(&self, path: &str) -> bool {
        let root = path.split(['.', '[']).next().unwrap_or_default();
        root == DOC_KEY || root == SYSTEM_KEY
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("doc_id", &self.doc_id)
            .field("version", &self.version)
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::PathRenderer;
    use serde_json::json;

    fn env(vars: Value, doc: Value) -> Environment {
        let Value::Object(vars) = vars else {
            panic!("vars must be an object");
        };
        Environment::new(
            DocId::new("doc-1"),
            &vars,
            DocumentSnapshot { version: 3, body: doc },
            json!({"region": "eu"}),
            Arc::new(PathRenderer),
        )
    }

    #[test]
    fn test_var_template_renders_against_doc() {
        let env = env(json!({"x": "{{doc.a}}"}), json!({"a": 5}));
        assert_eq!(env.get("x"), Some(json!(5)));
        assert_eq!(env.get_i64("x"), Some(5));
    }

    #[test]
    fn test_rendering_is_lazy() {
        let env = env(json!({"x": "{{doc.a}}"}), json!({"a": 5}));
        assert_eq!(env.raw("x"), Some(&json!("{{doc.a}}")));
    }

    #[test]
    fn test_doc_and_system_access() {
        let env = env(json!({}), json!({"a": {"b": [1, 2]}}));
        assert_eq!(env.get("doc.a.b[1]"), Some(json!(2)));
        assert_eq!(env.get_str("system.region").as_deref(), Some("eu"));
        assert_eq!(env.version(), 3);
        assert_eq!(env.doc_id().as_str(), "doc-1");
    }

    #[test]
    fn test_doc_strings_are_not_templates() {
        let env = env(json!({}), json!({"note": "{{system.region}}"}));
        assert_eq!(env.get("doc.note"), Some(json!("{{system.region}}")));
    }

    #[test]
    fn test_missing_path_is_none() {
        let env = env(json!({"x": 1}), json!({}));
        assert_eq!(env.get("y"), None);
        assert_eq!(env.get("doc.nothing"), None);
    }

    #[test]
    fn test_warning_still_returns_value() {
        let env = env(json!({"x": "value: {{doc.b}}"}), json!({}));
        assert_eq!(env.get("x"), Some(json!("value: ")));
        assert_eq!(env.get_complete("x"), None);
        assert_eq!(env.try_get("x").unwrap().missing_paths(), vec!["doc.b"]);
    }

    #[test]
    fn test_fatal_returns_none() {
        let env = env(json!({"x": "{{unknown.thing}}"}), json!({}));
        assert_eq!(env.get("x"), None);
        assert!(matches!(env.try_get("x"), Some(Rendered::Fatal(_))));
    }

    #[test]
    fn test_nested_var_rendering() {
        let env = env(
            json!({"req": {"url": "https://x/{{doc.id}}", "tags": ["{{system.region}}"]}}),
            json!({"id": 42}),
        );
        assert_eq!(env.get("req.url"), Some(json!("https://x/42")));
        assert_eq!(env.get("req"), Some(json!({"url": "https://x/42", "tags": ["eu"]})));
    }

    #[test]
    fn test_var_can_reference_other_raw_var() {
        let env = env(json!({"name": "world", "greeting": "hello {{name}}"}), json!({}));
        assert_eq!(env.get_str("greeting").as_deref(), Some("hello world"));
    }

    #[test]
    fn test_resolve_all() {
        let env = env(json!({"x": "{{doc.a}}"}), json!({"a": 1}));
        let resolved = env.resolve_all();
        let value = resolved.value().unwrap();
        assert_eq!(value["x"], json!(1));
        assert_eq!(value["doc"], json!({"a": 1}));
        assert_eq!(value["system"]["region"], json!("eu"));
    }
}
