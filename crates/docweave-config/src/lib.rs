//! Configuration for docweave.
//!
//! Provides TOML-based configuration with:
//! - Engine defaults (`[engine]`), such as the per-attempt step timeout
//! - Logging settings (`[logging]`)
//! - A free-form `[system]` table exposed to every step as `system`
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
