//! # Anima Configuration
//!
//! Configuration management with support for:
//! - Multiple formats (YAML, TOML, JSON)
//! - Environment variable expansion (`${VAR}` / `${VAR:-default}`)
//! - Validation that blocks boot on malformed settings
//! - The [`Settings`] contract implemented by external loaders

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod loader;
pub mod types;
pub mod validator;

pub use loader::{load_config, load_from_file, load_from_str};
pub use types::{CacheConfig, Config, Protocol, QueueConfig, RedisConfig, ServiceConfig};
pub use validator::validate_config;

use anima_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Config("Unable to detect config format".to_string()))?;

        match ext {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(Error::Config(format!("Unsupported config format: {other}"))),
        }
    }
}

/// The contract an application's settings provider satisfies. Boot and
/// reload both call [`Settings::load`]; a failure prevents boot.
pub trait Settings: Send + Sync {
    /// Load (or re-load) the configuration.
    fn load(&self) -> Result<Config>;
}

/// File-backed settings using the bundled loader.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    /// Settings read from `path` on every load.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Settings for FileSettings {
    fn load(&self) -> Result<Config> {
        load_config(&self.path)
    }
}

/// Fixed settings, for tests and embedded applications.
#[derive(Debug, Clone)]
pub struct StaticSettings {
    config: Config,
}

impl StaticSettings {
    /// Settings that always load a clone of `config`.
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Settings for StaticSettings {
    fn load(&self) -> Result<Config> {
        validate_config(&self.config)?;
        Ok(self.config.clone())
    }
}
