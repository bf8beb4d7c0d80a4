//! Error types for service control and configuration.
//!
//! Per-service failures (`ServiceError`) are local: they end the call that
//! produced them and leave the service in the state it had before. A
//! `ConfigError` is the only fatal kind and aborts startup.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single start/stop request against one service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `start` was called while a child for this service is still alive.
    #[error("service {name} is already running")]
    AlreadyRunning { name: String },
    /// `stop` was called while no child is alive.
    #[error("service {name} is not running")]
    NotRunning { name: String },
    /// The OS refused to spawn the command (bad command, directory, permissions).
    #[error("failed to launch service {name}: {source}")]
    LaunchFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    /// The termination signal could not be delivered to the process group.
    #[error("failed to signal service {name}: {source}")]
    SignalFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    /// No service is registered at the given index.
    #[error("no service at index {0}")]
    UnknownService(usize),
}

impl ServiceError {
    /// Short machine-friendly label, used in diagnostic log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::AlreadyRunning { .. } => "already_running",
            ServiceError::NotRunning { .. } => "not_running",
            ServiceError::LaunchFailed { .. } => "launch_failed",
            ServiceError::SignalFailed { .. } => "signal_failed",
            ServiceError::UnknownService(_) => "unknown_service",
        }
    }
}

/// Invalid or unreadable configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config file {path} defines no services")]
    NoServices { path: PathBuf },
    #[error("duplicate service name: {0}")]
    DuplicateName(String),
    #[error("service {0} has an empty command")]
    EmptyCommand(String),
}
