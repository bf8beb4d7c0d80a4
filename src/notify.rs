//! Notification channel between services and the refresh loop.
//!
//! Services publish their own index whenever their running state changes
//! (after a launch and after a reap). A single consumer drains the indices in
//! the order they were sent. The channel is unbounded so that publishing never
//! blocks process control.

use tokio::sync::mpsc;

/// Write half, cloned into every service.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<usize>,
}

/// Read half, owned by the refresh loop.
#[derive(Debug)]
pub struct Notifications {
    rx: mpsc::UnboundedReceiver<usize>,
}

pub fn channel() -> (Notifier, Notifications) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx }, Notifications { rx })
}

impl Notifier {
    /// Announces that service `id` changed. Dropped silently once the reader is gone.
    pub fn service_changed(&self, id: usize) {
        let _ = self.tx.send(id);
    }
}

impl Notifications {
    /// Waits for the next changed index; `None` once every notifier is dropped.
    pub async fn next(&mut self) -> Option<usize> {
        self.rx.recv().await
    }

    /// Returns a pending index without waiting.
    #[cfg(test)]
    pub fn try_next(&mut self) -> Option<usize> {
        self.rx.try_recv().ok()
    }
}
