//! Output capture for supervised services.
//!
//! Every service owns one `OutputSink`. The sink appends everything a child
//! writes to the service's history and, unless paused, forwards the same bytes
//! to the shared `Viewport` that is currently on screen.

use std::sync::{Arc, Mutex, PoisonError};

/// Upper bound on the bytes kept in the live viewport. History is unbounded.
const VIEWPORT_LIMIT: usize = 1 << 20;

/// The single live output buffer rendered by the TUI.
///
/// Cheap to clone; all clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct Viewport {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Viewport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes, dropping the oldest whole lines once over the limit.
    pub fn write(&self, bytes: &[u8]) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend_from_slice(bytes);
        if buffer.len() > VIEWPORT_LIMIT {
            let overflow = buffer.len() - VIEWPORT_LIMIT;
            let cut = buffer[overflow..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|pos| overflow + pos + 1)
                .unwrap_or(overflow);
            buffer.drain(..cut);
        }
    }

    /// Replaces the whole buffer, used to repaint after a selection change.
    pub fn replace(&self, bytes: &[u8]) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.clear();
        buffer.extend_from_slice(bytes);
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug)]
struct SinkState {
    paused: bool,
    history: Vec<u8>,
}

/// A pausable sink that mirrors a service's output into its history and the viewport.
///
/// The pause flag and the history share one mutex, and forwarding happens while
/// it is held, so a single write is either forwarded whole or dropped whole.
#[derive(Debug)]
pub struct OutputSink {
    state: Mutex<SinkState>,
    viewport: Viewport,
}

impl OutputSink {
    /// Creates a sink that starts paused; it forwards once its service is selected.
    pub fn new(viewport: Viewport) -> Self {
        Self {
            state: Mutex::new(SinkState {
                paused: true,
                history: Vec::new(),
            }),
            viewport,
        }
    }

    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.history.extend_from_slice(bytes);
        if !state.paused {
            self.viewport.write(bytes);
        }
    }

    pub fn pause(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .paused = true;
    }

    pub fn resume(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .paused = false;
    }

    /// Repaints the viewport with the full history and resumes forwarding.
    ///
    /// Both happen under the sink lock, so no write lands between the repaint
    /// and the resume.
    pub fn resume_into_viewport(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.viewport.replace(&state.history);
        state.paused = false;
    }

    /// Snapshot of everything this service has written since startup.
    pub fn history(&self) -> Vec<u8> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .clone()
    }
}

#[cfg(test)]
impl OutputSink {
    fn is_paused(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).paused
    }

    fn history_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .len()
    }
}
