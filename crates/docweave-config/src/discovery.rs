//! Finding the docweave config files and folding them into one.
//!
//! Two layers are read, the second winning key by key:
//!
//! | Layer   | File                                   |
//! |---------|----------------------------------------|
//! | user    | `<config dir>/config.toml`             |
//! | project | `docweave.toml` in the project dir     |
//!
//! Flags such as `--verbose` are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use crate::{ConfigError, DocweaveConfig, Result};

/// File looked up in the project directory.
const PROJECT_CONFIG_FILE: &str = "docweave.toml";

/// File looked up in the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Subdirectory of the platform config dir.
const APP_NAME: &str = "docweave";

/// Replaces the platform config dir when set and non-empty.
const CONFIG_DIR_ENV: &str = "DOCWEAVE_CONFIG_DIR";

/// One layer that discovery looked at.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// False when the file was absent or rejected.
    pub loaded: bool,
}

/// Merged settings plus a record of how they were assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DocweaveConfig,
    /// Every layer considered, user layer first.
    pub sources: Vec<ConfigSource>,
    /// One message per layer file that exists but was skipped.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Files that contributed to `config`.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Read both layers, taking the user config dir from the environment.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Read both layers. A `config_dir` given here wins over
/// `DOCWEAVE_CONFIG_DIR`; `project_dir` defaults to the working directory.
///
/// Never fails because of a bad layer file. Those end up in
/// [`LoadedConfig::warnings`] instead.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = DocweaveConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => xdg_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Parse and validate a single config file.
pub fn load_config_file(path: &Path) -> Result<DocweaveConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    DocweaveConfig::from_toml(&contents)
}

/// `config.toml` inside [`xdg_config_dir`].
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Directory holding the user layer and, by default, the log files.
///
/// `DOCWEAVE_CONFIG_DIR` if set, else `docweave` under [`dirs::config_dir`].
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Merge one layer into `config`. An absent file is not an error and leaves
/// no warning.
fn load_layer(config: &mut DocweaveConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    let loaded = path.is_file()
        && match load_config_file(path) {
            Ok(layer) => {
                config.merge(layer);
                true
            }
            Err(e) => {
                warnings.push(format!("Failed to load {}: {}", path.display(), e));
                false
            }
        };

    ConfigSource {
        path: path.to_path_buf(),
        loaded,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
