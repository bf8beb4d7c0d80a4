//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, restoring it on exit,
//! and drawing the service list, the shared output viewport, the debug panel and
//! the modal overlays with `ratatui`.

use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};
use tracing::warn;

use crate::ansi::{plain_lines, styled_lines};
use crate::app::{App, QuitChoice, StatusLevel};
use crate::logging::DebugLog;
use crate::supervisor::Supervisor;

/// Type alias for the specific terminal backend used.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

const DEBUG_PANEL_HEIGHT: u16 = 8;

const HELP_TEXT: &[&str] = &[
    "Services:",
    "  j / Down      Next service",
    "  k / Up        Previous service",
    "  Enter/Space   Start or stop selected",
    "  u             Start all",
    "  d             Stop all",
    "",
    "Output:",
    "  f             Toggle follow",
    "  a             Toggle ANSI stripping",
    "  PgUp/PgDn     Scroll",
    "  Home/End      Top / bottom",
    "",
    "General:",
    "  .             Toggle debug panel",
    "  ?             Toggle this help",
    "  q / Ctrl-C    Quit",
];

/// Initializes the terminal for TUI mode.
///
/// Enables raw mode, enters the alternate screen, and creates a `ratatui` Terminal instance.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, SetTitle("prockeeper"))?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws the current application state to the terminal.
pub fn draw(
    app: &mut App,
    supervisor: &Supervisor,
    debug_log: &DebugLog,
    terminal: &mut TuiTerminal,
) -> io::Result<()> {
    let output = supervisor.viewport().contents();
    terminal.draw(|frame| render(frame, app, &output, debug_log))?;
    Ok(())
}

/// Matches the terminal's buffers to the backend size after a resize event.
/// A failure is logged and the next draw retries.
pub fn fit_to_backend<B: Backend>(terminal: &mut Terminal<B>) {
    if let Err(err) = terminal.autoresize() {
        warn!("failed to resize terminal: {}", err);
    }
}

fn render(frame: &mut Frame, app: &mut App, output: &[u8], debug_log: &DebugLog) {
    let area = frame.size();
    let list_height = u16::try_from(app.services.len())
        .unwrap_or(u16::MAX)
        .saturating_add(2)
        .min(area.height / 3)
        .max(3);
    let mut constraints = vec![Constraint::Length(list_height), Constraint::Min(3)];
    if app.show_debug {
        constraints.push(Constraint::Length(DEBUG_PANEL_HEIGHT));
    }
    constraints.push(Constraint::Length(4));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    let border_style = Style::default().fg(Color::DarkGray);

    render_service_list(frame, app, chunks[0], border_style);
    render_viewport(frame, app, output, chunks[1], border_style);
    if app.show_debug {
        render_debug_panel(frame, debug_log, chunks[2], border_style);
    }
    render_status(frame, app, chunks[chunks.len() - 1], border_style);

    if app.show_help {
        let popup = centered_rect(50, 70, area);
        let help = Paragraph::new(HELP_TEXT.join("\n"))
            .block(
                Block::default()
                    .title("Help")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            )
            .style(Style::default().bg(Color::DarkGray).fg(Color::White));
        frame.render_widget(Clear, popup);
        frame.render_widget(help, popup);
    }

    if let Some(focus) = app.quit_prompt {
        render_quit_prompt(frame, app, focus, area);
    }
}

fn render_service_list(frame: &mut Frame, app: &App, area: Rect, border_style: Style) {
    let items: Vec<ListItem> = app
        .services
        .iter()
        .map(|entry| {
            let style = if entry.running {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            ListItem::new(Line::from(Span::styled(entry.title.clone(), style)))
        })
        .collect();
    let list = List::new(items)
        .block(
            Block::default()
                .title(format!("Services ({}/{} running)", app.running_count(), app.services.len()))
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(border_style),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    let mut state = ListState::default();
    if !app.services.is_empty() {
        state.select(Some(app.selected.min(app.services.len() - 1)));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_viewport(frame: &mut Frame, app: &mut App, output: &[u8], area: Rect, border_style: Style) {
    let heading = app
        .selected_service()
        .map(|entry| entry.heading.clone())
        .unwrap_or_default();
    let block = Block::default()
        .title(heading)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border_style);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let lines = if app.strip_ansi {
        plain_lines(output)
    } else {
        styled_lines(output)
    };
    let height = inner.height as usize;
    let start = app.layout_viewport(lines.len(), height);
    if lines.is_empty() {
        let empty = Paragraph::new("No output yet").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, inner);
        return;
    }
    let visible: Vec<Line<'static>> = lines.into_iter().skip(start).take(height).collect();
    frame.render_widget(Paragraph::new(Text::from(visible)), inner);
}

fn render_debug_panel(frame: &mut Frame, debug_log: &DebugLog, area: Rect, border_style: Style) {
    let block = Block::default()
        .title("Debug")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border_style);
    let height = block.inner(area).height as usize;
    let lines: Vec<Line> = debug_log
        .tail(height)
        .into_iter()
        .map(|line| Line::from(Span::styled(line, Style::default().fg(Color::DarkGray))))
        .collect();
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_status(frame: &mut Frame, app: &App, area: Rect, border_style: Style) {
    let default_help =
        "j/k select | Enter toggle | u start all | d stop all | f follow | a ansi | . debug | ? help | q quit";
    let help_line = match app.status_message() {
        Some((text, StatusLevel::Warning)) => {
            Line::from(Span::styled(text.to_string(), Style::default().fg(Color::Yellow)))
        }
        Some((text, StatusLevel::Info)) => {
            Line::from(Span::styled(text.to_string(), Style::default().fg(Color::Cyan)))
        }
        None => Line::from(Span::styled(default_help, Style::default().fg(Color::DarkGray))),
    };
    let status = Paragraph::new(Text::from(vec![Line::from(app.status_line()), help_line])).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style),
    );
    frame.render_widget(status, area);
}

fn render_quit_prompt(frame: &mut Frame, app: &App, focus: QuitChoice, area: Rect) {
    let popup = centered_fixed(44, 7, area);
    let mut buttons = Vec::new();
    for choice in QuitChoice::ALL {
        let style = if choice == focus {
            Style::default().fg(Color::Black).bg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        buttons.push(Span::styled(format!(" {} ", choice.label()), style));
        buttons.push(Span::raw("  "));
    }
    buttons.pop();
    let text = Text::from(vec![
        Line::from(format!("{} service(s) still running.", app.running_count())),
        Line::default(),
        Line::from(buttons),
    ]);
    let prompt = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .title("Running services!")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(Color::Yellow)),
        );
    frame.render_widget(Clear, popup);
    frame.render_widget(prompt, popup);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn centered_fixed(width: u16, height: u16, r: Rect) -> Rect {
    let width = width.min(r.width);
    let height = height.min(r.height);
    Rect {
        x: r.x + (r.width - width) / 2,
        y: r.y + (r.height - height) / 2,
        width,
        height,
    }
}
