//! Configuration management for prockeeper.
//!
//! This module defines the structure of the `prockeeper.toml` configuration file
//! and provides functionality to load, parse and validate it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "prockeeper.toml";

/// Sample configuration printed by `prockeeper example`.
pub const EXAMPLE_CONFIG: &str = r#"# Diagnostic log, appended to on every run (optional).
log_file = "/tmp/prockeeper.log"

# Show the debug panel on startup (optional).
debug = false

[[service]]
name = "rails server"
command = "rails s"
dir = "backend"

[[service]]
name = "node server"
command = "npm start"
dir = "frontend"
"#;

/// Top-level configuration structure corresponding to `prockeeper.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path of the append-only diagnostic log.
    pub log_file: Option<PathBuf>,
    /// Whether the debug panel is visible on startup.
    pub debug: Option<bool>,
    /// Services to supervise, in display order.
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceConfig>,
}

/// Configuration for a single service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Display name of the service.
    pub name: String,
    /// Shell command line, run through `sh -c`.
    #[serde(alias = "cmd")]
    pub command: String,
    /// Working directory for the service.
    #[serde(alias = "cwd")]
    pub dir: Option<String>,
}

/// Loads, parses and validates the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(path, &raw)?;
    validate(path, &config)?;
    Ok(config)
}

fn parse_config(path: &Path, raw: &str) -> Result<Config, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn validate(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if config.services.is_empty() {
        return Err(ConfigError::NoServices {
            path: path.to_path_buf(),
        });
    }
    let mut seen = HashSet::new();
    for service in &config.services {
        if !seen.insert(service.name.as_str()) {
            return Err(ConfigError::DuplicateName(service.name.clone()));
        }
        if service.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand(service.name.clone()));
        }
    }
    Ok(())
}
