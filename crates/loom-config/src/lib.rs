//! Configuration system for the Loom workspace runner.
//!
//! Provides TOML-based configuration with:
//! - Per-concern sections (`[server]`, `[workspace]`, `[storage]`,
//!   `[compute]`, `[terminal]`) that fall back to defaults when absent
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, config_dir, load_config, load_config_file,
    load_config_with_options, log_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
