//! prockeeper: keeps a handful of long-running development services in one
//! terminal.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads configuration, installs logging, and runs the event loop that ties the
//! supervisor to the TUI.

mod ansi;
mod app;
mod config;
mod error;
mod events;
mod logging;
mod notify;
mod output;
mod process;
mod service;
mod supervisor;
mod tui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::{App, AppAction, ServiceEntry};
use crate::config::{load_config, Config, DEFAULT_CONFIG_PATH, EXAMPLE_CONFIG};
use crate::events::Event;
use crate::logging::{init_logging, DebugLog};
use crate::process::ServiceSpec;
use crate::supervisor::{refresh_loop, FanOutReport, Supervisor};

const DEFAULT_LOG_FILE: &str = "/tmp/prockeeper.log";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "prockeeper",
    version,
    about = "Start, stop and watch your development services from one terminal",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Show the debug panel on startup.
    #[arg(long)]
    debug: bool,
    /// Append diagnostics to this file instead of the configured one.
    #[arg(long, conflicts_with = "no_log_file")]
    log_file: Option<PathBuf>,
    /// Do not write a diagnostic log file.
    #[arg(long)]
    no_log_file: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a sample configuration file.
    Example,
    /// Show version information.
    Version,
}

impl Cli {
    fn log_file(&self, config: &Config) -> Option<PathBuf> {
        if self.no_log_file {
            return None;
        }
        self.log_file
            .clone()
            .or_else(|| config.log_file.clone())
            .or_else(|| Some(PathBuf::from(DEFAULT_LOG_FILE)))
    }

    fn show_debug(&self, config: &Config) -> bool {
        self.debug || config.debug.unwrap_or(false)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Example) => {
            print!("{}", EXAMPLE_CONFIG);
            return Ok(());
        }
        Some(Commands::Version) => {
            println!("prockeeper {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        None => {}
    }

    let config = load_config(&cli.config)?;
    let debug_log = DebugLog::default();
    init_logging(debug_log.clone(), cli.log_file(&config).as_deref())?;
    let show_debug = cli.show_debug(&config);

    let specs: Vec<ServiceSpec> = config.services.into_iter().map(ServiceSpec::from).collect();
    info!(
        "prockeeper {} supervising {} services",
        env!("CARGO_PKG_VERSION"),
        specs.len()
    );

    let (notifier, notifications) = notify::channel();
    let supervisor = Arc::new(Supervisor::new(specs, notifier));
    let entries = supervisor
        .services()
        .iter()
        .map(|service| ServiceEntry {
            name: service.name().to_string(),
            title: service.display_name(),
            heading: service.spec().heading(),
            running: service.is_running(),
        })
        .collect();
    let mut app = App::new(entries, show_debug);

    let (event_tx, mut event_rx) = mpsc::channel(256);
    tokio::spawn(refresh_loop(
        supervisor.clone(),
        notifications,
        event_tx.clone(),
    ));

    let mut terminal = tui::init_terminal().context("failed to initialise terminal")?;
    spawn_input_listener(event_tx.clone());
    spawn_signal_listener(event_tx.clone());

    let tick_rate = Duration::from_millis(150);
    let mut ticker = tokio::time::interval(tick_rate);
    let mut result = Ok(());

    loop {
        tokio::select! {
            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else {
                    break;
                };
                match event {
                    Event::ServiceUpdated { id, title, running } => {
                        app.on_service_updated(id, title, running);
                    }
                    Event::Key(key) => {
                        let action = app.handle_key(key);
                        handle_app_action(action, &mut app, &supervisor).await;
                    }
                    Event::Resize { width, height } => {
                        debug!(width, height, "terminal resized");
                        tui::fit_to_backend(&mut terminal);
                    }
                    Event::QuitRequested => {
                        info!("termination signal received");
                        app.request_quit(supervisor.any_running());
                    }
                }
            }
            _ = ticker.tick() => {}
        }

        app.check_quit_after_stop(supervisor.any_running());
        if let Err(err) = tui::draw(&mut app, &supervisor, &debug_log, &mut terminal) {
            result = Err(err.into());
            break;
        }
        if app.should_quit {
            break;
        }
    }

    tui::restore_terminal(terminal)?;
    info!("prockeeper exiting");
    result
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            let event = match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key))
                    if key.kind == crossterm::event::KeyEventKind::Press =>
                {
                    Event::Key(key)
                }
                Ok(crossterm::event::Event::Resize(width, height)) => {
                    Event::Resize { width, height }
                }
                _ => continue,
            };
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
    });
}

/// Turns SIGINT/SIGTERM sent to prockeeper into a quit request, so they go
/// through the same gate as `q`.
fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!("cannot listen for SIGTERM: {}", err);
                    return;
                }
            };
            loop {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if res.is_err() {
                            return;
                        }
                    }
                    received = sigterm.recv() => {
                        if received.is_none() {
                            return;
                        }
                    }
                }
                if tx.send(Event::QuitRequested).await.is_err() {
                    return;
                }
            }
        }
        #[cfg(not(unix))]
        {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(Event::QuitRequested).await.is_err() {
                    return;
                }
            }
        }
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}

fn summarize<T>(label: &str, report: &FanOutReport<T>) -> String {
    let failed: Vec<String> = report
        .iter()
        .filter_map(|(_, outcome)| outcome.as_ref().err().map(|err| err.to_string()))
        .collect();
    if failed.is_empty() {
        format!("{}: ok", label)
    } else {
        format!("{}: {} failed ({})", label, failed.len(), failed.join("; "))
    }
}

async fn handle_app_action(action: AppAction, app: &mut App, supervisor: &Supervisor) {
    match action {
        AppAction::Toggle(id) => supervisor.toggle(id),
        AppAction::StartAll => {
            let report = supervisor.start_all().await;
            app.set_status_message(summarize("start all", &report));
        }
        AppAction::StopAll => {
            let report = supervisor.stop_all().await;
            let signalled = report.iter().filter(|(_, outcome)| outcome.is_ok()).count();
            app.set_status_message(format!("stop all: signalled {}", signalled));
        }
        AppAction::Select(id) => {
            if let Err(err) = supervisor.selection_changed(id) {
                warn!("{}", err);
                app.set_status_warning_for(err.to_string(), Duration::from_secs(3));
            }
        }
        AppAction::QuitRequested => app.request_quit(supervisor.any_running()),
        AppAction::StopAndQuit => {
            supervisor.stop_all().await;
        }
        AppAction::ForceQuit => {
            warn!(
                "force quit; {} services left running",
                supervisor.running_count()
            );
        }
        AppAction::None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;

    fn config(log_file: Option<&str>, debug: Option<bool>) -> Config {
        Config {
            log_file: log_file.map(PathBuf::from),
            debug,
            services: Vec::new(),
        }
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["prockeeper"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(cli.command.is_none());
        assert_eq!(
            cli.log_file(&config(None, None)),
            Some(PathBuf::from(DEFAULT_LOG_FILE))
        );
        assert!(!cli.show_debug(&config(None, None)));
    }

    #[test]
    fn cli_flags_override_config() {
        let cli =
            Cli::try_parse_from(["prockeeper", "-c", "dev.toml", "--debug", "--log-file", "a.log"])
                .unwrap();
        assert_eq!(cli.config, PathBuf::from("dev.toml"));
        let config = config(Some("b.log"), Some(false));
        assert_eq!(cli.log_file(&config), Some(PathBuf::from("a.log")));
        assert!(cli.show_debug(&config));

        let cli = Cli::try_parse_from(["prockeeper"]).unwrap();
        assert_eq!(cli.log_file(&config), Some(PathBuf::from("b.log")));
    }

    #[test]
    fn no_log_file_disables_logging_to_disk() {
        let cli = Cli::try_parse_from(["prockeeper", "--no-log-file"]).unwrap();
        assert_eq!(cli.log_file(&config(Some("b.log"), None)), None);
        assert!(Cli::try_parse_from(["prockeeper", "--no-log-file", "--log-file", "x"]).is_err());
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["prockeeper", "example"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Example)));
        let cli = Cli::try_parse_from(["prockeeper", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Version)));
    }

    #[test]
    fn summary_lists_failures() {
        let report: FanOutReport<u32> = vec![
            (0, Ok(10)),
            (1, Err(ServiceError::UnknownService(7))),
        ];
        let text = summarize("start all", &report);
        assert!(text.starts_with("start all: 1 failed ("));
        let ok: FanOutReport<u32> = vec![(0, Ok(1))];
        assert_eq!(summarize("start all", &ok), "start all: ok");
    }
}
