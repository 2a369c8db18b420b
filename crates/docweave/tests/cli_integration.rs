//! CLI integration tests for the docweave command-line interface.
//!
//! Every test runs in its own temporary directory with an explicit
//! `--config-dir`, so neither the user config nor a `docweave.toml` in the
//! working directory leaks in.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ORDER_PIPELINE: &str = r#"
[pipeline]
name = "order"
factory = "section"

[[pipeline.steps]]
name = "summary"
factory = "render"
register = "summary"
vars = { value = "{{doc.customer}} owes {{doc.total}}" }

[[pipeline.steps]]
name = "total"
factory = "render"
register = "total"
vars = { value = "{{doc.amount}}" }
"#;

/// Get a command for the docweave binary, isolated in `dir`.
fn docweave(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("docweave").unwrap();
    cmd.current_dir(dir)
        .env_remove("DOCWEAVE_CONFIG_DIR")
        .arg("--config-dir")
        .arg(dir.join("config"));
    cmd
}

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("docweave")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_version_displays() {
    Command::cargo_bin("docweave")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("docweave"));
}

#[test]
fn test_run_requires_pipeline() {
    Command::cargo_bin("docweave")
        .unwrap()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("PIPELINE"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Validate
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_validate_valid_pipeline() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "order.toml", ORDER_PIPELINE);

    docweave(dir.path())
        .args(["validate", "order.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("order"))
        .stdout(predicate::str::contains("3 steps"));
}

#[test]
fn test_validate_json_output() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "order.toml", ORDER_PIPELINE);
    write(
        dir.path(),
        "config/config.toml",
        "[engine]\ndefault_timeout_ms = 1500\n",
    );

    docweave(dir.path())
        .args(["--json", "validate", "order.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"))
        .stdout(predicate::str::contains("\"default_timeout_ms\": 1500"));
}

#[test]
fn test_validate_rejects_duplicate_names() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "dup.toml",
        r#"
[pipeline]
name = "dup"
factory = "section"

[[pipeline.steps]]
name = "a"
factory = "render"
vars = { value = 1 }

[[pipeline.steps]]
name = "a"
factory = "render"
vars = { value = 2 }
"#,
    );

    docweave(dir.path())
        .args(["validate", "dup.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate step name 'a'"));
}

#[test]
fn test_validate_rejects_unknown_factory() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "unknown.json",
        r#"{"pipeline": {"name": "p", "factory": "teleport"}}"#,
    );

    docweave(dir.path())
        .args(["validate", "unknown.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("teleport"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Run
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_prints_final_document() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "order.toml", ORDER_PIPELINE);
    write(dir.path(), "doc.json", r#"{"customer": "ann", "amount": 42}"#);

    let output = docweave(dir.path())
        .args(["--json", "run", "order.toml", "--doc", "doc.json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let document: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        document,
        serde_json::json!({
            "customer": "ann",
            "amount": 42,
            "total": 42,
            "summary": "ann owes 42",
        })
    );
}

#[test]
fn test_run_exposes_system_config() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "config/config.toml",
        "[system]\nregion = \"eu\"\n",
    );
    write(
        dir.path(),
        "region.toml",
        r#"
[pipeline]
name = "region"
factory = "render"
register = "where"
vars = { value = "{{system.region}}" }
"#,
    );

    docweave(dir.path())
        .args(["--json", "run", "region.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"where\": \"eu\""));
}

#[test]
fn test_project_config_overrides_user_config() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "config/config.toml",
        "[system]\nregion = \"eu\"\n",
    );
    write(dir.path(), "docweave.toml", "[system]\nregion = \"us\"\n");
    write(
        dir.path(),
        "region.toml",
        r#"
[pipeline]
name = "region"
factory = "render"
register = "where"
vars = { value = "{{system.region}}" }
"#,
    );

    docweave(dir.path())
        .args(["--json", "run", "region.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"where\": \"us\""));
}

#[test]
fn test_run_failure_names_step() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "broken.toml",
        r#"
[pipeline]
name = "broken"
factory = "section"

[[pipeline.steps]]
name = "oops"
factory = "render"
register = "x"
vars = { value = "{{nowhere.at_all}}" }
"#,
    );

    docweave(dir.path())
        .args(["run", "broken.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed at step 'oops'"));
}

#[test]
fn test_run_fails_on_misspelled_system_key() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "config/config.toml",
        "[system]\nregion = \"eu\"\n",
    );
    write(
        dir.path(),
        "typo.toml",
        r#"
[pipeline]
name = "typo"
factory = "section"

[[pipeline.steps]]
name = "where"
factory = "render"
register = "where"
vars = { value = "{{system.regoin}}" }
"#,
    );

    docweave(dir.path())
        .args(["run", "typo.toml"])
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed at step 'where'"))
        .stderr(predicate::str::contains("system.regoin"));
}

#[test]
fn test_run_styled_summary() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "order.toml", ORDER_PIPELINE);
    write(dir.path(), "doc.json", r#"{"customer": "bo", "amount": 7}"#);

    docweave(dir.path())
        .args(["run", "order.toml", "--doc", "doc.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline 'order' complete"))
        .stdout(predicate::str::contains("bo owes 7"));
}

#[test]
fn test_run_rejects_non_object_document() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "order.toml", ORDER_PIPELINE);
    write(dir.path(), "doc.json", "[1, 2, 3]");

    docweave(dir.path())
        .args(["run", "order.toml", "--doc", "doc.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must contain a JSON object"));
}

#[test]
fn test_malformed_config_is_a_warning() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "config/config.toml", "[engine\nbroken");
    write(dir.path(), "order.toml", ORDER_PIPELINE);

    docweave(dir.path())
        .args(["validate", "order.toml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Failed to load"));
}
