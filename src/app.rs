//! Application state and UI logic.
//!
//! `App` holds what the screen shows: one list entry per service (titles come
//! from the supervisor's refresh loop), the current selection, viewport scroll
//! state, toggles and the quit prompt. Key presses are translated into
//! `AppAction`s that the event loop carries out against the supervisor.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// One row of the service list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    /// `[  pid] name` while running, `[      ] name` otherwise.
    pub title: String,
    /// Viewport heading, `<dir>: <command>`.
    pub heading: String,
    pub running: bool,
}

/// Actions resulting from user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    /// No action required.
    None,
    /// Start or stop a service depending on its state.
    Toggle(usize),
    StartAll,
    StopAll,
    /// The selection moved; the viewport should switch services.
    Select(usize),
    /// The user asked to quit. The caller decides whether to gate it.
    QuitRequested,
    /// Stop every service, then exit once they are all down.
    StopAndQuit,
    /// Exit immediately, leaving children running.
    ForceQuit,
}

/// Buttons of the "Running services!" prompt, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitChoice {
    StopAndQuit,
    ForceQuit,
    Cancel,
}

impl QuitChoice {
    pub const ALL: [QuitChoice; 3] = [QuitChoice::StopAndQuit, QuitChoice::ForceQuit, QuitChoice::Cancel];

    pub fn label(self) -> &'static str {
        match self {
            QuitChoice::StopAndQuit => "Stop & Quit",
            QuitChoice::ForceQuit => "Force Quit",
            QuitChoice::Cancel => "Cancel",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|choice| *choice == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    fn previous(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StatusLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone)]
struct StatusMessage {
    text: String,
    at: Instant,
    ttl: Option<Duration>,
    level: StatusLevel,
}

/// The main application state container.
#[derive(Debug)]
pub struct App {
    pub services: Vec<ServiceEntry>,
    pub selected: usize,
    pub show_help: bool,
    pub show_debug: bool,
    /// Render the viewport with escape sequences removed.
    pub strip_ansi: bool,
    /// Keep the viewport pinned to the newest output.
    pub follow: bool,
    /// First visible viewport line when not following.
    pub scroll: usize,
    /// Focused button while the quit prompt is open.
    pub quit_prompt: Option<QuitChoice>,
    /// Exit once every service has stopped.
    pub quit_after_stop: bool,
    pub should_quit: bool,
    view_height: usize,
    total_lines: usize,
    status_message: Option<StatusMessage>,
}

impl App {
    pub fn new(services: Vec<ServiceEntry>, show_debug: bool) -> Self {
        Self {
            services,
            selected: 0,
            show_help: false,
            show_debug,
            strip_ansi: false,
            follow: true,
            scroll: 0,
            quit_prompt: None,
            quit_after_stop: false,
            should_quit: false,
            view_height: 0,
            total_lines: 0,
            status_message: None,
        }
    }

    pub fn selected_service(&self) -> Option<&ServiceEntry> {
        self.services.get(self.selected)
    }

    pub fn running_count(&self) -> usize {
        self.services.iter().filter(|entry| entry.running).count()
    }

    /// Applies a title published by the refresh loop.
    pub fn on_service_updated(&mut self, id: usize, title: String, running: bool) {
        if let Some(entry) = self.services.get_mut(id) {
            entry.title = title;
            entry.running = running;
        }
    }

    /// Opens the quit prompt when services are running, otherwise quits.
    pub fn request_quit(&mut self, any_running: bool) {
        if any_running {
            self.show_help = false;
            self.quit_prompt = Some(QuitChoice::Cancel);
        } else {
            self.should_quit = true;
        }
    }

    /// Called after every event while a stop-and-quit is in flight.
    pub fn check_quit_after_stop(&mut self, any_running: bool) {
        if self.quit_after_stop && !any_running {
            self.should_quit = true;
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return AppAction::QuitRequested;
        }
        if let Some(focus) = self.quit_prompt {
            return self.handle_quit_prompt(key, focus);
        }
        self.handle_normal_input(key)
    }

    fn handle_quit_prompt(&mut self, key: KeyEvent, focus: QuitChoice) -> AppAction {
        match key.code {
            KeyCode::Left | KeyCode::BackTab | KeyCode::Char('h') => {
                self.quit_prompt = Some(focus.previous());
                AppAction::None
            }
            KeyCode::Right | KeyCode::Tab | KeyCode::Char('l') => {
                self.quit_prompt = Some(focus.next());
                AppAction::None
            }
            KeyCode::Esc => {
                self.quit_prompt = None;
                AppAction::None
            }
            KeyCode::Enter | KeyCode::Char(' ') => self.choose(focus),
            _ => AppAction::None,
        }
    }

    fn choose(&mut self, choice: QuitChoice) -> AppAction {
        self.quit_prompt = None;
        match choice {
            QuitChoice::StopAndQuit => {
                self.quit_after_stop = true;
                self.set_status_warning_persistent("Stopping all services before quitting...");
                AppAction::StopAndQuit
            }
            QuitChoice::ForceQuit => {
                self.should_quit = true;
                AppAction::ForceQuit
            }
            QuitChoice::Cancel => AppAction::None,
        }
    }

    fn handle_normal_input(&mut self, key: KeyEvent) -> AppAction {
        match key.code {
            KeyCode::Char('q') => AppAction::QuitRequested,
            KeyCode::Char('j') | KeyCode::Down => {
                if self.selected + 1 < self.services.len() {
                    self.select(self.selected + 1)
                } else {
                    AppAction::None
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if self.selected > 0 {
                    self.select(self.selected - 1)
                } else {
                    AppAction::None
                }
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                if self.services.is_empty() {
                    AppAction::None
                } else {
                    AppAction::Toggle(self.selected)
                }
            }
            KeyCode::Char('u') => AppAction::StartAll,
            KeyCode::Char('d') => AppAction::StopAll,
            KeyCode::Char('?') => {
                self.show_help = !self.show_help;
                AppAction::None
            }
            KeyCode::Esc => {
                self.show_help = false;
                AppAction::None
            }
            KeyCode::Char('.') => {
                self.show_debug = !self.show_debug;
                AppAction::None
            }
            KeyCode::Char('a') => {
                self.strip_ansi = !self.strip_ansi;
                AppAction::None
            }
            KeyCode::Char('f') => {
                self.follow = !self.follow;
                if !self.follow {
                    self.scroll = self.max_scroll();
                }
                AppAction::None
            }
            KeyCode::PageUp => {
                self.scroll_up(self.view_height.max(1));
                AppAction::None
            }
            KeyCode::PageDown => {
                self.scroll_down(self.view_height.max(1));
                AppAction::None
            }
            KeyCode::Home => {
                self.scroll = 0;
                self.follow = false;
                AppAction::None
            }
            KeyCode::End => {
                self.follow = true;
                self.scroll = self.max_scroll();
                AppAction::None
            }
            _ => AppAction::None,
        }
    }

    fn select(&mut self, id: usize) -> AppAction {
        self.selected = id;
        self.follow = true;
        self.scroll = 0;
        AppAction::Select(id)
    }

    fn max_scroll(&self) -> usize {
        self.total_lines.saturating_sub(self.view_height.max(1))
    }

    pub fn scroll_up(&mut self, amount: usize) {
        let current = if self.follow { self.max_scroll() } else { self.scroll };
        self.scroll = current.saturating_sub(amount);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, amount: usize) {
        let max_scroll = self.max_scroll();
        let current = if self.follow { max_scroll } else { self.scroll };
        let next = (current + amount).min(max_scroll);
        self.scroll = next;
        self.follow = next == max_scroll;
    }

    /// Records the rendered viewport size and returns the first line to show.
    pub fn layout_viewport(&mut self, total_lines: usize, height: usize) -> usize {
        self.total_lines = total_lines;
        self.view_height = height;
        let max_scroll = self.max_scroll();
        self.scroll = if self.follow {
            max_scroll
        } else {
            self.scroll.min(max_scroll)
        };
        self.scroll
    }

    pub fn status_line(&self) -> String {
        let Some(entry) = self.selected_service() else {
            return "No services".to_string();
        };
        format!(
            "{} | {} | running: {}/{} | follow: {} | ansi: {}",
            entry.name,
            if entry.running { "running" } else { "stopped" },
            self.running_count(),
            self.services.len(),
            if self.follow { "on" } else { "off" },
            if self.strip_ansi { "off" } else { "on" }
        )
    }

    pub fn status_message(&self) -> Option<(&str, StatusLevel)> {
        let message = self.status_message.as_ref()?;
        let still_visible = match message.ttl {
            Some(ttl) => message.at.elapsed() < ttl,
            None => true,
        };
        still_visible.then_some((message.text.as_str(), message.level))
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.set_status_message_with_level(message, StatusLevel::Info, Some(Duration::from_secs(3)));
    }

    pub fn set_status_warning_for(&mut self, message: impl Into<String>, ttl: Duration) {
        self.set_status_message_with_level(message, StatusLevel::Warning, Some(ttl));
    }

    pub fn set_status_warning_persistent(&mut self, message: impl Into<String>) {
        self.set_status_message_with_level(message, StatusLevel::Warning, None);
    }

    fn set_status_message_with_level(
        &mut self,
        message: impl Into<String>,
        level: StatusLevel,
        ttl: Option<Duration>,
    ) {
        self.status_message = Some(StatusMessage {
            text: message.into(),
            at: Instant::now(),
            ttl,
            level,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn make_app(count: usize) -> App {
        let services = (0..count)
            .map(|i| ServiceEntry {
                name: format!("svc{}", i),
                title: format!("[      ] svc{}", i),
                heading: format!("dir{}: run {}", i, i),
                running: false,
            })
            .collect();
        App::new(services, false)
    }

    #[test]
    fn navigation_stays_in_bounds() {
        let mut app = make_app(2);
        assert_eq!(app.handle_key(key(KeyCode::Up)), AppAction::None);
        assert_eq!(app.handle_key(key(KeyCode::Char('j'))), AppAction::Select(1));
        assert_eq!(app.handle_key(key(KeyCode::Down)), AppAction::None);
        assert_eq!(app.selected, 1);
        assert_eq!(app.handle_key(key(KeyCode::Char('k'))), AppAction::Select(0));
    }

    #[test]
    fn control_keys_map_to_actions() {
        let mut app = make_app(3);
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), AppAction::Toggle(1));
        assert_eq!(app.handle_key(key(KeyCode::Char(' '))), AppAction::Toggle(1));
        assert_eq!(app.handle_key(key(KeyCode::Char('u'))), AppAction::StartAll);
        assert_eq!(app.handle_key(key(KeyCode::Char('d'))), AppAction::StopAll);
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), AppAction::QuitRequested);
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(app.handle_key(ctrl_c), AppAction::QuitRequested);
    }

    #[test]
    fn toggles_flip_view_state() {
        let mut app = make_app(1);
        app.handle_key(key(KeyCode::Char('?')));
        app.handle_key(key(KeyCode::Char('.')));
        app.handle_key(key(KeyCode::Char('a')));
        assert!(app.show_help && app.show_debug && app.strip_ansi);
        app.handle_key(key(KeyCode::Esc));
        assert!(!app.show_help);
    }

    #[test]
    fn refresh_updates_titles() {
        let mut app = make_app(2);
        app.on_service_updated(1, "[  4242] svc1".to_string(), true);
        assert_eq!(app.services[1].title, "[  4242] svc1");
        assert_eq!(app.running_count(), 1);
        app.on_service_updated(9, "ignored".to_string(), true);
        assert_eq!(app.running_count(), 1);
    }

    #[test]
    fn quit_without_running_services_exits() {
        let mut app = make_app(1);
        app.request_quit(false);
        assert!(app.should_quit);
        assert!(app.quit_prompt.is_none());
    }

    #[test]
    fn quit_prompt_defaults_to_cancel() {
        let mut app = make_app(1);
        app.request_quit(true);
        assert_eq!(app.quit_prompt, Some(QuitChoice::Cancel));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), AppAction::None);
        assert!(app.quit_prompt.is_none());
        assert!(!app.should_quit);
    }

    #[test]
    fn quit_prompt_keys_do_not_leak_to_the_list() {
        let mut app = make_app(2);
        app.request_quit(true);
        assert_eq!(app.handle_key(key(KeyCode::Char('d'))), AppAction::None);
        assert_eq!(app.handle_key(key(KeyCode::Down)), AppAction::None);
        assert_eq!(app.selected, 0);
        app.handle_key(key(KeyCode::Esc));
        assert!(app.quit_prompt.is_none());
    }

    #[test]
    fn force_quit_exits_immediately() {
        let mut app = make_app(1);
        app.request_quit(true);
        app.handle_key(key(KeyCode::Left));
        assert_eq!(app.quit_prompt, Some(QuitChoice::ForceQuit));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), AppAction::ForceQuit);
        assert!(app.should_quit);
    }

    #[test]
    fn stop_and_quit_waits_for_services() {
        let mut app = make_app(1);
        app.request_quit(true);
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.quit_prompt, Some(QuitChoice::StopAndQuit));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), AppAction::StopAndQuit);
        assert!(!app.should_quit);
        app.check_quit_after_stop(true);
        assert!(!app.should_quit);
        app.check_quit_after_stop(false);
        assert!(app.should_quit);
    }

    #[test]
    fn follow_tracks_the_tail_until_scrolled() {
        let mut app = make_app(1);
        assert_eq!(app.layout_viewport(100, 10), 90);
        app.handle_key(key(KeyCode::PageUp));
        assert!(!app.follow);
        assert_eq!(app.layout_viewport(120, 10), 80);
        for _ in 0..3 {
            app.handle_key(key(KeyCode::PageDown));
        }
        assert!(app.follow);
        assert_eq!(app.layout_viewport(130, 10), 120);
        app.handle_key(key(KeyCode::Home));
        assert_eq!(app.layout_viewport(130, 10), 0);
        app.handle_key(key(KeyCode::End));
        assert_eq!(app.layout_viewport(130, 10), 120);
    }

    #[test]
    fn selecting_resets_to_follow() {
        let mut app = make_app(2);
        app.layout_viewport(50, 10);
        app.scroll_up(5);
        assert!(!app.follow);
        app.handle_key(key(KeyCode::Down));
        assert!(app.follow);
    }

    #[test]
    fn status_message_expires() {
        let mut app = make_app(1);
        app.set_status_message("hello");
        assert!(matches!(app.status_message(), Some(("hello", StatusLevel::Info))));
        app.set_status_warning_for("gone", Duration::ZERO);
        assert!(app.status_message().is_none());
        assert!(app.status_line().starts_with("svc0 | stopped | running: 0/1"));
    }
}
