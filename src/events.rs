//! Event definitions for the application event loop.
//!
//! This module defines the `Event` enum which carries everything the
//! presentation loop reacts to: refreshed service titles published by the
//! supervisor's refresh loop, user input, and external termination signals.

use crossterm::event::KeyEvent;

/// Represents an event in the application's main event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The refresh loop recomputed a service's list title.
    ServiceUpdated {
        id: usize,
        title: String,
        running: bool,
    },
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
    /// SIGINT or SIGTERM was delivered to prockeeper itself.
    QuitRequested,
}
