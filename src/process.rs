//! Static description and observable status of a supervised service.
//!
//! `ServiceSpec` is the immutable part of a service, built once from the
//! configuration. `ServiceStatus` is derived on demand from whether a live
//! child is currently attached to the service.

use std::fmt;
use std::path::PathBuf;

use crate::config::ServiceConfig;

/// Specification for a service to be supervised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Friendly name for the service.
    pub name: String,
    /// Shell command line, run through `sh -c`.
    pub command: String,
    /// Working directory, `None` to inherit ours.
    pub dir: Option<PathBuf>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, dir: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            dir,
        }
    }

    /// Heading shown above the output viewport, e.g. `backend: rails s`.
    pub fn heading(&self) -> String {
        match &self.dir {
            Some(dir) => format!("{}: {}", dir.display(), self.command),
            None => format!(".: {}", self.command),
        }
    }
}

impl From<ServiceConfig> for ServiceSpec {
    fn from(config: ServiceConfig) -> Self {
        let dir = config
            .dir
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        Self {
            name: config.name,
            command: config.command,
            dir,
        }
    }
}

/// The current lifecycle status of a service.
///
/// A service whose child has been sent SIGTERM but not yet reaped is still
/// `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Running { pid: u32 },
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            ServiceStatus::Running { pid } => Some(*pid),
            ServiceStatus::Stopped => None,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Running { pid } => write!(f, "running ({})", pid),
        }
    }
}

/// Formats a list title: the PID in a fixed six-column field, blank when stopped.
pub fn format_title(name: &str, status: ServiceStatus) -> String {
    match status.pid() {
        Some(pid) => format!("[{:>6}] {}", pid, name),
        None => format!("[{:6}] {}", "", name),
    }
}
