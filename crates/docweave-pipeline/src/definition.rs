//! Declarative pipeline definition parser.
//!
//! Parses TOML or JSON pipeline files into a tree of [`StepConfig`] nodes and
//! validates them before any step is built.
//!
//! # Example TOML
//!
//! ```toml
//! [pipeline]
//! name = "order"
//! factory = "section"
//!
//! [[pipeline.steps]]
//! name = "subtotal"
//! factory = "render"
//! register = "subtotal"
//! vars = { value = "{{doc.order.amount}}" }
//!
//! [[pipeline.steps]]
//! name = "summary"
//! factory = "render"
//! register = "summary"
//! timeout_ms = 1000
//! vars = { value = "Order total: {{doc.subtotal}}" }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::environment::{DOC_KEY, SYSTEM_KEY};
use crate::error::PipelineError;

/// Per-attempt timeout when a node does not set `timeout_ms`.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Factory key of the built-in composite step.
pub const SECTION_FACTORY: &str = "section";

/// Top-level wrapper matching the file structure `[pipeline]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineFile {
    pub pipeline: StepConfig,
}

/// Configuration of one step node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StepConfig {
    /// Step name, unique among its siblings.
    pub name: String,

    /// Key under which the step's constructor is registered.
    #[serde(alias = "class")]
    pub factory: String,

    /// Variables; string leaves may contain templates.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub vars: Map<String, Value>,

    /// Bound on a single attempt, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Document field that receives the step's value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,

    /// Children (sections only).
    #[serde(default, alias = "children", skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepConfig>,
}

impl StepConfig {
    pub fn new(name: impl Into<String>, factory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: factory.into(),
            vars: Map::new(),
            timeout_ms: None,
            register: None,
            steps: Vec::new(),
        }
    }

    /// A section node.
    pub fn section(name: impl Into<String>) -> Self {
        Self::new(name, SECTION_FACTORY)
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_register(mut self, field: impl Into<String>) -> Self {
        self.register = Some(field.into());
        self
    }

    pub fn with_step(mut self, child: StepConfig) -> Self {
        self.steps.push(child);
        self
    }

    pub fn is_section(&self) -> bool {
        self.factory == SECTION_FACTORY
    }

    /// Per-attempt timeout in milliseconds, falling back to [`DEFAULT_TIMEOUT_MS`].
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    /// Per-attempt timeout, falling back to [`DEFAULT_TIMEOUT_MS`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.effective_timeout_ms())
    }

    /// Fill in `timeout_ms` on this node and every descendant that lacks one.
    pub fn apply_default_timeout(&mut self, timeout_ms: u64) {
        if self.timeout_ms.is_none() {
            self.timeout_ms = Some(timeout_ms);
        }
        for child in &mut self.steps {
            child.apply_default_timeout(timeout_ms);
        }
    }

    /// Total number of nodes in this subtree.
    pub fn count(&self) -> usize {
        1 + self.steps.iter().map(StepConfig::count).sum::<usize>()
    }

    /// Validate this subtree.
    ///
    /// Checks:
    /// - Names are non-empty and unique among siblings
    /// - `timeout_ms` is positive
    /// - Sections do not register a field; leaves have no children
    /// - `doc` and `system` are not used as variable names
    /// - No two steps register the same field
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut registered = HashMap::new();
        self.validate_node(&mut registered)
    }

    fn validate_node<'a>(
        &'a self,
        registered: &mut HashMap<&'a str, &'a str>,
    ) -> Result<(), PipelineError> {
        if self.name.is_empty() {
            return Err(PipelineError::Configuration("Step name cannot be empty".into()));
        }
        if self.factory.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "Step '{}' has no factory",
                self.name
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(PipelineError::Configuration(format!(
                "Step '{}' must have a positive timeout_ms",
                self.name
            )));
        }
        for reserved in [DOC_KEY, SYSTEM_KEY] {
            if self.vars.contains_key(reserved) {
                return Err(PipelineError::Configuration(format!(
                    "Step '{}' uses reserved variable name '{}'",
                    self.name, reserved
                )));
            }
        }

        if self.is_section() {
            if self.register.is_some() {
                return Err(PipelineError::Configuration(format!(
                    "Section '{}' cannot register a result",
                    self.name
                )));
            }
        } else if !self.steps.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "Step '{}' has children but is not a section",
                self.name
            )));
        }

        if let Some(field) = self.register.as_deref() {
            if field.is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "Step '{}' has an empty register field",
                    self.name
                )));
            }
            if let Some(other) = registered.insert(field, &self.name) {
                return Err(PipelineError::Configuration(format!(
                    "Field '{}' is registered by both '{}' and '{}'",
                    field, other, self.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for child in &self.steps {
            if !seen.insert(child.name.as_str()) {
                return Err(PipelineError::Configuration(format!(
                    "Duplicate step name '{}' in section '{}'",
                    child.name, self.name
                )));
            }
            child.validate_node(registered)?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl PipelineFile {
    /// Parse a pipeline definition from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineError> {
        toml::from_str(toml_str).map_err(|e| PipelineError::Parse(format!("TOML parse error: {}", e)))
    }

    /// Parse a pipeline definition from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json_str)
            .map_err(|e| PipelineError::Parse(format!("JSON parse error: {}", e)))
    }

    /// Load a pipeline definition from a file. `.json` files are parsed as
    /// JSON, everything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Parse(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let file = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content)?,
            _ => Self::from_toml(&content)?,
        };
        debug!(
            "Loaded pipeline '{}' ({} steps) from {}",
            file.pipeline.name,
            file.pipeline.count(),
            path.display()
        );
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.pipeline.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID_PIPELINE: &str = r#"
[pipeline]
name = "order"
factory = "section"

[[pipeline.steps]]
name = "subtotal"
factory = "render"
register = "subtotal"
vars = { value = "{{doc.order.amount}}" }

[[pipeline.steps]]
name = "details"
factory = "section"

[[pipeline.steps.steps]]
name = "summary"
factory = "render"
register = "summary"
timeout_ms = 1000
vars = { value = "Order total: {{doc.subtotal}}" }
"#;

    #[test]
    fn test_parse_valid_pipeline() {
        let file = PipelineFile::from_toml(VALID_PIPELINE).unwrap();
        let root = &file.pipeline;
        assert_eq!(root.name, "order");
        assert!(root.is_section());
        assert_eq!(root.steps.len(), 2);
        assert_eq!(root.steps[0].register.as_deref(), Some("subtotal"));
        assert_eq!(root.steps[0].vars["value"], json!("{{doc.order.amount}}"));
        assert_eq!(root.steps[1].steps[0].timeout_ms, Some(1000));
        assert_eq!(root.count(), 4);
        file.validate().unwrap();
    }

    #[test]
    fn test_parse_json_with_aliases() {
        let file = PipelineFile::from_json(
            r#"{"pipeline": {"name": "root", "class": "section", "children": [
                {"name": "a", "class": "render", "register": "a", "vars": {"value": 1}}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(file.pipeline.factory, "section");
        assert_eq!(file.pipeline.steps[0].factory, "render");
        file.validate().unwrap();
    }

    #[test]
    fn test_default_timeout() {
        let config = StepConfig::new("a", "render");
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(
            config.with_timeout_ms(100).timeout(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_apply_default_timeout_keeps_explicit_values() {
        let mut root = StepConfig::section("root")
            .with_step(StepConfig::new("a", "render"))
            .with_step(StepConfig::new("b", "render").with_timeout_ms(50));
        root.apply_default_timeout(2000);
        assert_eq!(root.timeout_ms, Some(2000));
        assert_eq!(root.steps[0].timeout_ms, Some(2000));
        assert_eq!(root.steps[1].timeout_ms, Some(50));
    }

    #[test]
    fn test_invalid_toml() {
        let err = PipelineFile::from_toml("not valid {{").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[test]
    fn test_validate_empty_name() {
        let err = StepConfig::new("", "render").validate().unwrap_err();
        assert!(err.to_string().contains("name cannot be empty"));
    }

    #[test]
    fn test_validate_duplicate_sibling_names() {
        let root = StepConfig::section("root")
            .with_step(StepConfig::new("a", "render"))
            .with_step(StepConfig::new("a", "render"));
        assert!(root.validate().unwrap_err().to_string().contains("Duplicate step name"));
    }

    #[test]
    fn test_validate_same_name_in_different_sections_ok() {
        let root = StepConfig::section("root")
            .with_step(StepConfig::section("s1").with_step(StepConfig::new("a", "render")))
            .with_step(StepConfig::section("s2").with_step(StepConfig::new("a", "render")));
        root.validate().unwrap();
    }

    #[test]
    fn test_validate_zero_timeout() {
        let err = StepConfig::new("a", "render")
            .with_timeout_ms(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("positive timeout_ms"));
    }

    #[test]
    fn test_validate_section_cannot_register() {
        let err = StepConfig::section("s").with_register("x").validate().unwrap_err();
        assert!(err.to_string().contains("cannot register"));
    }

    #[test]
    fn test_validate_leaf_with_children() {
        let err = StepConfig::new("a", "render")
            .with_step(StepConfig::new("b", "render"))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("not a section"));
    }

    #[test]
    fn test_validate_reserved_var_names() {
        let err = StepConfig::new("a", "render")
            .with_var("doc", "x")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("reserved variable name 'doc'"));
    }

    #[test]
    fn test_validate_duplicate_register_field() {
        let root = StepConfig::section("root")
            .with_step(StepConfig::new("a", "render").with_register("out"))
            .with_step(StepConfig::section("inner").with_step(StepConfig::new("b", "render").with_register("out")));
        let err = root.validate().unwrap_err();
        assert!(err.to_string().contains("registered by both 'a' and 'b'"));
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("p.toml");
        std::fs::write(&toml_path, VALID_PIPELINE).unwrap();
        assert_eq!(PipelineFile::from_file(&toml_path).unwrap().pipeline.name, "order");

        let json_path = dir.path().join("p.json");
        std::fs::write(
            &json_path,
            r#"{"pipeline": {"name": "j", "factory": "section"}}"#,
        )
        .unwrap();
        assert_eq!(PipelineFile::from_file(&json_path).unwrap().pipeline.name, "j");
    }

    #[test]
    fn test_from_file_missing() {
        let err = PipelineFile::from_file(Path::new("/nonexistent/p.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_serialize_skips_empty() {
        let value = serde_json::to_value(StepConfig::new("a", "render")).unwrap();
        assert_eq!(value, json!({"name": "a", "factory": "render"}));
    }
}
