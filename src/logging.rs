//! Diagnostic logging.
//!
//! Lifecycle events and per-service errors are emitted with `tracing`. The
//! subscriber installed here tees every formatted line into the in-memory
//! debug panel and, when configured, an append-only log file.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the `tracing` filter directive.
pub const LOG_ENV: &str = "PROCKEEPER_LOG";

const DEBUG_PANEL_LINES: usize = 500;

/// Ring buffer of the most recent log lines, shown in the debug panel.
#[derive(Debug, Clone)]
pub struct DebugLog {
    max_lines: usize,
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::new(DEBUG_PANEL_LINES)
    }
}

impl DebugLog {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines.min(1024)))),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.push_back(line.into());
        while lines.len() > self.max_lines {
            lines.pop_front();
        }
    }

    /// The last `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = lines.len().saturating_sub(count);
        lines.iter().skip(skip).cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Writer handed to the `fmt` layer; one clone per event.
#[derive(Clone)]
struct DiagnosticWriter {
    panel: DebugLog,
    file: Option<Arc<Mutex<File>>>,
}

impl Write for DiagnosticWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = file.write_all(buf);
        }
        let text = String::from_utf8_lossy(buf);
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            self.panel.push(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            file.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        Ok(())
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

/// Installs the global subscriber. Stdout belongs to the TUI, so nothing is
/// written there.
pub fn init_logging(panel: DebugLog, log_file: Option<&Path>) -> Result<()> {
    let file = log_file
        .map(open_log_file)
        .transpose()?
        .map(|file| Arc::new(Mutex::new(file)));
    let writer = DiagnosticWriter { panel, file };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(BoxMakeWriter::new(move || writer.clone()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install log subscriber")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn debug_log_keeps_newest_lines() {
        let log = DebugLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.len(), 2);
        assert_eq!(log.tail(10), vec!["b", "c"]);
        assert_eq!(log.tail(1), vec!["c"]);
    }

    #[test]
    fn writer_tees_into_panel_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("prockeeper.log");
        let panel = DebugLog::new(10);
        let mut writer = DiagnosticWriter {
            panel: panel.clone(),
            file: Some(Arc::new(Mutex::new(open_log_file(&path).unwrap()))),
        };
        writer
            .write_all(b"INFO Started service - api\n\nINFO Stopped service - api\n")
            .unwrap();
        writer.flush().unwrap();

        assert_eq!(
            panel.tail(10),
            vec!["INFO Started service - api", "INFO Stopped service - api"]
        );
        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.contains("Started service - api"));
    }

    #[test]
    fn log_file_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prockeeper.log");
        std::fs::write(&path, "previous run\n").unwrap();
        let mut file = open_log_file(&path).unwrap();
        file.write_all(b"this run\n").unwrap();
        drop(file);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "previous run\nthis run\n"
        );
    }
}
