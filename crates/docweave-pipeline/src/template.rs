//! Template rendering for step variables.
//!
//! Resolves `{{expression}}` templates in string values against a JSON
//! context, so that a step variable such as `"{{doc.customer.name}}"` sees the
//! document as it is at the moment of the attempt.
//!
//! # Template Syntax
//!
//! - `{{doc.field}}`: access a document field
//! - `{{system.region}}`: access system configuration
//! - `{{doc.items[0].name}}`: array index access
//! - `{{other_var}}`: another (raw) step variable
//!
//! # Failure policy
//!
//! Rendering never retries. An unknown root identifier or an empty expression
//! is fatal and produces no output. A path whose root exists but whose nested
//! segment does not is a warning: the expression renders as `null` (whole
//! string) or as an empty string (mixed text), and the warning names the
//! missing path so callers can decide to wait for it.

use std::fmt;

use serde_json::Value;

/// How serious a rendering problem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Fatal,
}

/// A problem found while rendering one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderIssue {
    pub severity: Severity,
    /// The expression, without braces.
    pub expression: String,
    pub message: String,
    /// The full path that could not be resolved, when the issue is missing data.
    pub missing_path: Option<String>,
}

impl fmt::Display for RenderIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Fatal => "FATAL",
        };
        write!(f, "{level} '{{{{{}}}}}': {}", self.expression, self.message)
    }
}

/// Result of rendering a template.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// Best available output, possibly with warnings.
    Output {
        value: Value,
        warnings: Vec<RenderIssue>,
    },
    /// Rendering failed; there is no output.
    Fatal(Vec<RenderIssue>),
}

impl Rendered {
    fn clean(value: Value) -> Self {
        Self::Output {
            value,
            warnings: Vec::new(),
        }
    }

    /// The rendered value, if rendering was not fatal.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Output { value, .. } => Some(value),
            Self::Fatal(_) => None,
        }
    }

    /// Every issue reported, warnings and fatal errors alike.
    pub fn issues(&self) -> &[RenderIssue] {
        match self {
            Self::Output { warnings, .. } => warnings,
            Self::Fatal(issues) => issues,
        }
    }

    /// Paths referenced by the template that were not present in the context.
    pub fn missing_paths(&self) -> Vec<&str> {
        self.issues()
            .iter()
            .filter_map(|issue| issue.missing_path.as_deref())
            .collect()
    }
}

/// Rendering service handed out by the engine.
pub trait TemplateRenderer: Send + Sync {
    /// Render a single string against `context` (a JSON object).
    fn render(&self, template: &str, context: &Value) -> Rendered;

    /// Whether `s` contains template syntax at all.
    fn is_template(&self, s: &str) -> bool {
        s.contains("{{")
    }
}

/// Render every template string in a JSON tree.
///
/// Objects and arrays are walked recursively; non-string leaves are returned
/// unchanged. Warnings from all leaves are collected; any fatal leaf makes the
/// whole tree fatal.
pub fn render_tree(renderer: &dyn TemplateRenderer, value: &Value, context: &Value) -> Rendered {
    let mut warnings = Vec::new();
    let mut fatal = Vec::new();
    let value = render_tree_inner(renderer, value, context, &mut warnings, &mut fatal);
    if fatal.is_empty() {
        Rendered::Output { value, warnings }
    } else {
        fatal.extend(warnings);
        Rendered::Fatal(fatal)
    }
}

fn render_tree_inner(
    renderer: &dyn TemplateRenderer,
    value: &Value,
    context: &Value,
    warnings: &mut Vec<RenderIssue>,
    fatal: &mut Vec<RenderIssue>,
) -> Value {
    match value {
        Value::String(s) if renderer.is_template(s) => match renderer.render(s, context) {
            Rendered::Output { value, warnings: w } => {
                warnings.extend(w);
                value
            }
            Rendered::Fatal(issues) => {
                fatal.extend(issues);
                Value::Null
            }
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        render_tree_inner(renderer, v, context, warnings, fatal),
                    )
                })
                .collect(),
        ),
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| render_tree_inner(renderer, v, context, warnings, fatal))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Default renderer: dot/index path expressions against the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathRenderer;

impl PathRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a single dot-separated path expression against the context.
    fn resolve_expression(&self, path: &str, context: &Value) -> Result<Value, RenderIssue> {
        let segments = parse_path_segments(path);

        let Some(root) = segments.first().filter(|s| !s.name.is_empty()) else {
            return Err(RenderIssue {
                severity: Severity::Fatal,
                expression: path.to_string(),
                message: "empty template expression".into(),
                missing_path: None,
            });
        };

        let mut current = match navigate_segment(context, root) {
            Some(v) => v,
            None if context.get(&root.name).is_none() => {
                return Err(RenderIssue {
                    severity: Severity::Fatal,
                    expression: path.to_string(),
                    message: format!("unknown token '{}'", root.name),
                    missing_path: Some(path.to_string()),
                });
            }
            None => return Err(missing_segment(path, root)),
        };

        for segment in &segments[1..] {
            current = navigate_segment(current, segment).ok_or_else(|| missing_segment(path, segment))?;
        }

        Ok(current.clone())
    }
}

fn missing_segment(path: &str, segment: &PathSegment) -> RenderIssue {
    RenderIssue {
        severity: Severity::Warning,
        expression: path.to_string(),
        message: format!("cannot resolve segment '{}'", segment),
        missing_path: Some(path.to_string()),
    }
}

impl TemplateRenderer for PathRenderer {
    /// If the entire string is a single expression (e.g. `"{{doc.count}}"`)
    /// the result keeps the JSON type of the resolved value. Mixed text and
    /// expressions are stringified and concatenated.
    fn render(&self, template: &str, context: &Value) -> Rendered {
        let expressions = parse_template_expressions(template);

        if expressions.is_empty() {
            return Rendered::clean(Value::String(template.to_string()));
        }

        if expressions.len() == 1 && expressions[0].full_match == template {
            return match self.resolve_expression(&expressions[0].path, context) {
                Ok(value) => Rendered::clean(value),
                Err(issue) if issue.severity == Severity::Warning => Rendered::Output {
                    value: Value::Null,
                    warnings: vec![issue],
                },
                Err(issue) => Rendered::Fatal(vec![issue]),
            };
        }

        let mut result = template.to_string();
        let mut warnings = Vec::new();
        let mut fatal = Vec::new();
        for expr in &expressions {
            let replacement = match self.resolve_expression(&expr.path, context) {
                Ok(value) => value_to_string(&value),
                Err(issue) => {
                    if issue.severity == Severity::Fatal {
                        fatal.push(issue);
                    } else {
                        warnings.push(issue);
                    }
                    String::new()
                }
            };
            result = result.replace(&expr.full_match, &replacement);
        }

        if fatal.is_empty() {
            Rendered::Output {
                value: Value::String(result),
                warnings,
            }
        } else {
            fatal.extend(warnings);
            Rendered::Fatal(fatal)
        }
    }
}

// ---------------------------------------------------------------------------
// Template expression parsing
// ---------------------------------------------------------------------------

/// A parsed `{{expression}}` occurrence in a string.
#[derive(Debug)]
struct TemplateExpression {
    /// The full match including braces, e.g. `"{{doc.field}}"`.
    full_match: String,
    /// The inner path, e.g. `"doc.field"`.
    path: String,
}

/// Find all `{{...}}` expressions in a string.
fn parse_template_expressions(s: &str) -> Vec<TemplateExpression> {
    let mut results = Vec::new();
    let mut remaining = s;

    while let Some(start) = remaining.find("{{") {
        let Some(end) = remaining[start..].find("}}") else {
            break; // Unclosed `{{`
        };
        let full_end = start + end + 2;
        results.push(TemplateExpression {
            full_match: remaining[start..full_end].to_string(),
            path: remaining[start + 2..start + end].trim().to_string(),
        });
        remaining = &remaining[full_end..];
    }

    results
}

// ---------------------------------------------------------------------------
// Path navigation
// ---------------------------------------------------------------------------

/// A segment of a dot-separated path, optionally with an array index.
#[derive(Debug)]
pub(crate) struct PathSegment {
    name: String,
    index: Option<usize>,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.name, i),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Parse a dot-separated path into segments, handling array indices.
///
/// `"doc.items[0].name"` → `[("doc", None), ("items", Some(0)), ("name", None)]`
pub(crate) fn parse_path_segments(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .map(|part| {
            if let Some(bracket_start) = part.find('[')
                && let Some(bracket_end) = part.find(']')
            {
                let name = part[..bracket_start].to_string();
                let index = part[bracket_start + 1..bracket_end].parse::<usize>().ok();
                return PathSegment { name, index };
            }
            PathSegment {
                name: part.to_string(),
                index: None,
            }
        })
        .collect()
}

/// Navigate one segment of a path through a JSON value.
pub(crate) fn navigate_segment<'a>(value: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    let field = if segment.name.is_empty() {
        value
    } else {
        value.get(&segment.name)?
    };

    match segment.index {
        Some(i) => field.get(i),
        None => Some(field),
    }
}

/// Convert a JSON value to its string representation for interpolation.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "null".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "doc": {
                "a": 5,
                "customer": {"name": "Alice", "tags": ["vip", "eu"]},
                "missing": null
            },
            "system": {"region": "eu-west"},
            "greeting": "hello"
        })
    }

    fn render(template: &str) -> Rendered {
        PathRenderer::new().render(template, &context())
    }

    #[test]
    fn test_whole_expression_preserves_type() {
        assert_eq!(render("{{doc.a}}").value(), Some(&json!(5)));
        assert_eq!(
            render("{{doc.customer}}").value().unwrap()["name"],
            json!("Alice")
        );
    }

    #[test]
    fn test_array_index() {
        assert_eq!(render("{{doc.customer.tags[1]}}").value(), Some(&json!("eu")));
    }

    #[test]
    fn test_mixed_text_stringifies() {
        let rendered = render("{{greeting}} {{doc.customer.name}} from {{system.region}} ({{doc.a}})");
        assert_eq!(rendered.value(), Some(&json!("hello Alice from eu-west (5)")));
        assert!(rendered.issues().is_empty());
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(render("{{ doc.a }}").value(), Some(&json!(5)));
    }

    #[test]
    fn test_no_template_passthrough() {
        assert_eq!(render("plain").value(), Some(&json!("plain")));
        assert_eq!(render("open {{ never closed").value(), Some(&json!("open {{ never closed")));
    }

    #[test]
    fn test_null_in_mixed_string() {
        assert_eq!(render("v={{doc.missing}}").value(), Some(&json!("v=null")));
    }

    #[test]
    fn test_unknown_root_is_fatal() {
        let rendered = render("{{greting}} User!");
        let Rendered::Fatal(issues) = rendered else {
            panic!("expected fatal");
        };
        assert_eq!(issues[0].severity, Severity::Fatal);
        assert!(issues[0].to_string().contains("unknown token 'greting'"));
    }

    #[test]
    fn test_missing_nested_segment_is_warning() {
        let rendered = render("{{doc.b}}");
        assert_eq!(rendered.value(), Some(&Value::Null));
        assert_eq!(rendered.missing_paths(), vec!["doc.b"]);
        assert_eq!(rendered.issues()[0].severity, Severity::Warning);
    }

    #[test]
    fn test_missing_segment_in_mixed_string_renders_empty() {
        let rendered = render("Hello {{doc.customer.last_name}}!");
        assert_eq!(rendered.value(), Some(&json!("Hello !")));
        assert!(rendered.issues()[0].to_string().starts_with("WARNING"));
    }

    #[test]
    fn test_out_of_bounds_index_is_warning() {
        let rendered = render("{{doc.customer.tags[9]}}");
        assert_eq!(rendered.missing_paths(), vec!["doc.customer.tags[9]"]);
    }

    #[test]
    fn test_empty_expression_is_fatal() {
        assert!(matches!(render("{{ }}"), Rendered::Fatal(_)));
    }

    #[test]
    fn test_render_tree_walks_objects_and_arrays() {
        let tree = json!({
            "label": "{{doc.customer.name}}",
            "items": ["{{doc.a}}", 3, "literal"],
            "nested": {"region": "{{system.region}}"}
        });
        let rendered = render_tree(&PathRenderer, &tree, &context());
        let value = rendered.value().unwrap();
        assert_eq!(value["label"], json!("Alice"));
        assert_eq!(value["items"], json!([5, 3, "literal"]));
        assert_eq!(value["nested"]["region"], json!("eu-west"));
    }

    #[test]
    fn test_render_tree_fatal_leaf_poisons_tree() {
        let tree = json!({"ok": "{{doc.a}}", "bad": "{{nope}}", "warn": "{{doc.zzz}}"});
        let rendered = render_tree(&PathRenderer, &tree, &context());
        let Rendered::Fatal(issues) = rendered else {
            panic!("expected fatal");
        };
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, Severity::Fatal);
    }
}
