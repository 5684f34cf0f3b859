//! mkv2mp4 TUI
//!
//! Interactive terminal front end for the batch converter. The UI task owns
//! all widget state; conversions and folder scans run in background tasks and
//! report back through the event channel, log lines arrive on their own channel.

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use mkv2mp4::logging::{self, LogSink};
use mkv2mp4::{
    channel, scan_directory, Config, Event as AppEvent, JobResult, RetryLevel, Session,
    SessionError, StatusSnapshot, SystemSampler,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Tabs, Wrap},
    Frame, Terminal,
};
use std::{
    collections::VecDeque,
    io::{self, Stdout},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::sync::mpsc::UnboundedReceiver;

const REFRESH_INTERVAL_MS: u64 = 500;
const MAX_LOG_LINES: usize = 500;

/// mkv2mp4 TUI - interactive batch converter
#[derive(Parser, Debug)]
#[command(name = "mkv2mp4-tui")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mkv2mp4.toml")]
    config: PathBuf,
}

// ============================================================================
// App State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Converter,
    Logs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Queue,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptKind {
    AddPath,
    WatchDir,
    Interval,
}

impl PromptKind {
    fn title(self) -> &'static str {
        match self {
            PromptKind::AddPath => "Add file or folder",
            PromptKind::WatchDir => "Watch folder",
            PromptKind::Interval => "Scan interval (minutes)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Confirm {
    Cancel,
    Quit,
}

/// The file being converted
#[derive(Debug, Clone)]
struct JobView {
    label: String,
    index: usize,
    total: usize,
    elapsed_secs: f64,
    percent: Option<f32>,
}

struct App {
    session: Session,
    events: UnboundedReceiver<AppEvent>,
    logs: UnboundedReceiver<String>,
    log_lines: VecDeque<String>,
    snapshot: Option<StatusSnapshot>,
    sampler: SystemSampler,
    tab: Tab,
    focus: Focus,
    queue_selected: usize,
    failed_selected: usize,
    job: Option<JobView>,
    overall: (usize, usize),
    paused: bool,
    status: String,
    monitor_status: String,
    prompt: Option<(PromptKind, String)>,
    confirm: Option<Confirm>,
}

impl App {
    fn new(
        session: Session,
        events: UnboundedReceiver<AppEvent>,
        logs: UnboundedReceiver<String>,
    ) -> Self {
        Self {
            session,
            events,
            logs,
            log_lines: VecDeque::with_capacity(MAX_LOG_LINES),
            snapshot: None,
            sampler: SystemSampler::new(),
            tab: Tab::Converter,
            focus: Focus::Queue,
            queue_selected: 0,
            failed_selected: 0,
            job: None,
            overall: (0, 0),
            paused: false,
            status: "Ready".to_string(),
            monitor_status: "Monitoring off".to_string(),
            prompt: None,
            confirm: None,
        }
    }

    /// Re-read the queue and host load
    async fn refresh(&mut self) {
        let system = self.sampler.sample();
        let snapshot = self.session.status(system).await;
        self.queue_selected = self
            .queue_selected
            .min(snapshot.queue.len().saturating_sub(1));
        self.failed_selected = self
            .failed_selected
            .min(snapshot.failed.len().saturating_sub(1));
        self.snapshot = Some(snapshot);
    }

    /// Apply everything the background tasks sent since the last frame
    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event);
        }
        while let Ok(line) = self.logs.try_recv() {
            if self.log_lines.len() >= MAX_LOG_LINES {
                self.log_lines.pop_front();
            }
            self.log_lines.push_back(line);
        }
    }

    fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::BatchStarted { total } => {
                self.overall = (0, total);
                self.status = format!("Converting {} file(s)", total);
            }
            AppEvent::JobStarted {
                label,
                index,
                total,
                ..
            } => {
                self.status = format!("Converting {}/{}: {}", index + 1, total, label);
                self.job = Some(JobView {
                    label,
                    index,
                    total,
                    elapsed_secs: 0.0,
                    percent: None,
                });
            }
            AppEvent::JobProgress {
                elapsed_secs,
                percent,
                ..
            } => {
                if let Some(job) = &mut self.job {
                    job.elapsed_secs = elapsed_secs;
                    job.percent = percent;
                }
            }
            AppEvent::JobFinished { path, result } => {
                let name = file_name(&path);
                self.status = match result {
                    JobResult::Converted { verification, .. } if verification.is_ok() => {
                        format!("Finished {}", name)
                    }
                    JobResult::Converted { verification, .. } => {
                        format!("Converted {} but {}", name, verification)
                    }
                    JobResult::Failed { reason } => {
                        format!("Failed {}: {}", name, reason.lines().last().unwrap_or(""))
                    }
                    JobResult::Cancelled => format!("Cancelled {}", name),
                };
            }
            AppEvent::OverallProgress { processed, total } => self.overall = (processed, total),
            AppEvent::Verified { .. } => {}
            AppEvent::OriginalDeleted { path } => {
                self.status = format!("Deleted original {}", file_name(&path));
            }
            AppEvent::DeletionFailed { path, error } => {
                self.status = format!("Could not delete {}: {}", file_name(&path), error);
            }
            AppEvent::Paused => {
                self.paused = true;
                self.status = "Paused".to_string();
            }
            AppEvent::Resumed => {
                self.paused = false;
                self.status = "Resumed".to_string();
            }
            AppEvent::CancelRequested => self.status = "Cancelling...".to_string(),
            AppEvent::BatchFinished(summary) => {
                self.job = None;
                self.paused = false;
                self.status = summary.to_string();
            }
            AppEvent::Monitor(status) => self.monitor_status = status.to_string(),
        }
    }

    fn report<T>(&mut self, result: Result<T, SessionError>, describe: impl FnOnce(T) -> String) {
        self.status = match result {
            Ok(value) => describe(value),
            Err(e) => e.to_string(),
        };
    }

    fn selected_failed(&self) -> Option<(PathBuf, String)> {
        let snapshot = self.snapshot.as_ref()?;
        let item = snapshot.failed.get(self.failed_selected)?;
        Some((item.path.clone(), item.reason.clone()))
    }

    /// Handle a key press, returns true when the app should exit
    async fn on_key(&mut self, code: KeyCode) -> bool {
        if let Some(confirm) = self.confirm.take() {
            if matches!(code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                match confirm {
                    Confirm::Quit => return true,
                    Confirm::Cancel => {
                        let result = self.session.cancel_batch().await;
                        self.report(result, |_| "Cancelling...".to_string());
                    }
                }
            }
            return false;
        }

        if let Some((kind, mut buffer)) = self.prompt.take() {
            match code {
                KeyCode::Enter => self.submit_prompt(kind, buffer.trim()).await,
                KeyCode::Esc => {}
                KeyCode::Backspace => {
                    buffer.pop();
                    self.prompt = Some((kind, buffer));
                }
                KeyCode::Char(c) => {
                    buffer.push(c);
                    self.prompt = Some((kind, buffer));
                }
                _ => self.prompt = Some((kind, buffer)),
            }
            return false;
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => {
                if self.session.is_converting() {
                    self.confirm = Some(Confirm::Quit);
                } else {
                    return true;
                }
            }
            KeyCode::Tab => {
                (self.tab, self.focus) = match (self.tab, self.focus) {
                    (Tab::Converter, Focus::Queue) => (Tab::Converter, Focus::Failed),
                    (Tab::Converter, Focus::Failed) => (Tab::Logs, Focus::Queue),
                    (Tab::Logs, _) => (Tab::Converter, Focus::Queue),
                };
            }
            KeyCode::Up => match self.focus {
                Focus::Queue => self.queue_selected = self.queue_selected.saturating_sub(1),
                Focus::Failed => self.failed_selected = self.failed_selected.saturating_sub(1),
            },
            KeyCode::Down => match self.focus {
                Focus::Queue => self.queue_selected += 1,
                Focus::Failed => self.failed_selected += 1,
            },
            KeyCode::Char('a') => self.prompt = Some((PromptKind::AddPath, String::new())),
            KeyCode::Char('w') => self.prompt = Some((PromptKind::WatchDir, String::new())),
            KeyCode::Char('i') => self.prompt = Some((PromptKind::Interval, String::new())),
            KeyCode::Char('d') => {
                let result = self.session.remove_at(self.queue_selected).await;
                self.report(result, |removed| match removed {
                    Some(path) => format!("Removed {}", file_name(&path)),
                    None => "Nothing selected".to_string(),
                });
            }
            KeyCode::Char('c') => {
                let result = self.session.clear_queue().await;
                self.report(result, |n| format!("Cleared {} file(s) from the queue", n));
            }
            KeyCode::Char('s') => {
                let result = self.session.start_batch().await;
                self.report(result, |_| "Starting conversion".to_string());
            }
            KeyCode::Char('p') => {
                let result = self.session.toggle_pause().await;
                self.report(result, |paused| {
                    let word = if paused { "Paused" } else { "Resumed" };
                    word.to_string()
                });
            }
            KeyCode::Char('x') => {
                if self.session.is_converting() {
                    self.confirm = Some(Confirm::Cancel);
                } else {
                    self.status = "No conversion is running".to_string();
                }
            }
            KeyCode::Char(c @ ('r' | '1' | '2')) => {
                let level = match c {
                    '1' => RetryLevel::Tolerant,
                    '2' => RetryLevel::Salvage,
                    _ => RetryLevel::Standard,
                };
                let result = self.session.retry_failed(level).await;
                self.report(result, |n| format!("Re-queued {} file(s) at {}", n, level));
            }
            KeyCode::Char('e') => {
                if let Some((path, reason)) = self.selected_failed() {
                    let level = RetryLevel::of_failure(&reason).next();
                    let result = self.session.retry_path(&path, level).await;
                    self.report(result, |_| {
                        format!("Re-queued {} at {}", file_name(&path), level)
                    });
                }
            }
            KeyCode::Char('f') => {
                let result = self.session.clear_failed().await;
                self.report(result, |n| format!("Cleared {} failed file(s)", n));
            }
            KeyCode::Char('m') => {
                if self.session.is_monitoring() {
                    self.session.stop_monitor().await;
                    self.status = "Monitoring stopped".to_string();
                } else {
                    let result = self.session.start_monitor().await;
                    self.report(result, |_| "Monitoring started".to_string());
                }
            }
            KeyCode::Char('D') => {
                let prefs = self
                    .session
                    .update_preferences(|p| {
                        p.auto_delete_verified_originals = !p.auto_delete_verified_originals
                    })
                    .await;
                self.status = format!(
                    "Delete verified originals: {}",
                    on_off(prefs.auto_delete_verified_originals)
                );
                self.session.save().await;
            }
            KeyCode::Char('A') => {
                let prefs = self
                    .session
                    .update_preferences(|p| p.auto_start_on_scan = !p.auto_start_on_scan)
                    .await;
                self.status = format!("Auto-start on scan: {}", on_off(prefs.auto_start_on_scan));
                self.session.save().await;
            }
            KeyCode::Char('g') => {
                let prefs = self
                    .session
                    .update_preferences(|p| {
                        p.use_hardware_acceleration = !p.use_hardware_acceleration
                    })
                    .await;
                self.status = format!(
                    "Hardware acceleration: {} (from the next batch)",
                    on_off(prefs.use_hardware_acceleration)
                );
                self.session.save().await;
            }
            _ => {}
        }
        false
    }

    async fn submit_prompt(&mut self, kind: PromptKind, input: &str) {
        if input.is_empty() {
            return;
        }
        let path = PathBuf::from(input);
        match kind {
            PromptKind::AddPath => {
                let paths = if path.is_dir() {
                    match scan_directory(&path, &self.session.config().monitor.extensions) {
                        Ok(found) => found,
                        Err(e) => {
                            self.status = e.to_string();
                            return;
                        }
                    }
                } else if path.is_file() {
                    vec![path]
                } else {
                    self.status = format!("{} does not exist", input);
                    return;
                };
                let result = self.session.enqueue_paths(paths).await;
                self.report(result, |report| {
                    if report.all_duplicates() {
                        "No files added (already queued or failed)".to_string()
                    } else {
                        format!("Added {} file(s)", report.added)
                    }
                });
            }
            PromptKind::WatchDir => {
                if !path.is_dir() {
                    self.status = format!("{} is not a directory", input);
                    return;
                }
                self.session
                    .update_preferences(|p| p.watch_directory = Some(path))
                    .await;
                self.status = format!("Watching {}", input);
                self.session.save().await;
            }
            PromptKind::Interval => match input.parse::<u64>() {
                Ok(minutes) if minutes > 0 => {
                    self.session
                        .update_preferences(|p| p.scan_interval_minutes = minutes)
                        .await;
                    self.status = if self.session.is_monitoring() {
                        format!("Scan interval {}m, applies when monitoring restarts", minutes)
                    } else {
                        format!("Scan interval {}m", minutes)
                    };
                    self.session.save().await;
                }
                _ => self.status = "Interval must be a positive whole number".to_string(),
            },
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// Gauge ratio and label for the current file
fn job_gauge(job: Option<&JobView>, paused: bool) -> (f64, String) {
    let (ratio, mut label) = match job {
        None => (0.0, "Idle".to_string()),
        Some(JobView {
            percent: Some(p), ..
        }) => (f64::from(*p) / 100.0, format!("{:.1}%", p)),
        Some(job) => (0.0, format!("Working... {}", format_duration(job.elapsed_secs as f32))),
    };
    if paused {
        label.push_str(" (paused)");
    }
    (ratio.clamp(0.0, 1.0), label)
}

/// Format duration in seconds to human-readable string
fn format_duration(secs: f32) -> String {
    let total_secs = secs as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

// ============================================================================
// Terminal Setup/Teardown
// ============================================================================

/// Initialize the terminal for TUI rendering
fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restore terminal to normal state
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// Widget Rendering
// ============================================================================

fn focused_block(title: &str, focused: bool) -> Block<'_> {
    let style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(style)
        .title(title)
}

/// Render the pending queue, highlighting the file being converted
fn render_queue(f: &mut Frame, area: Rect, app: &App) {
    let active = app.job.as_ref().map(|j| j.label.as_str());
    let items: Vec<ListItem> = app
        .snapshot
        .as_ref()
        .map(|s| {
            s.queue
                .iter()
                .map(|item| {
                    let style = if Some(item.label.as_str()) == active {
                        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    };
                    ListItem::new(Span::styled(item.label.clone(), style))
                })
                .collect()
        })
        .unwrap_or_default();

    let title = format!(" Queue ({}) ", items.len());
    let list = List::new(items)
        .block(focused_block(&title, app.focus == Focus::Queue))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(app.queue_selected));
    f.render_stateful_widget(list, area, &mut state);
}

/// Render failed files with the last line of their reason
fn render_failed(f: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .snapshot
        .as_ref()
        .map(|s| {
            s.failed
                .iter()
                .map(|item| {
                    ListItem::new(vec![
                        Line::from(file_name(&item.path)),
                        Line::from(Span::styled(
                            format!("  {}", item.reason.lines().last().unwrap_or("")),
                            Style::default().fg(Color::Red),
                        )),
                    ])
                })
                .collect()
        })
        .unwrap_or_default();

    let title = format!(" Failed ({}) ", items.len());
    let list = List::new(items)
        .block(focused_block(&title, app.focus == Focus::Failed))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(app.failed_selected));
    f.render_stateful_widget(list, area, &mut state);
}

/// Render per-file and overall progress gauges
fn render_progress(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(3)])
        .split(area);

    let (ratio, label) = job_gauge(app.job.as_ref(), app.paused);
    let title = match &app.job {
        Some(job) => format!(" [{}/{}] {} ", job.index + 1, job.total, job.label),
        None => " Current file ".to_string(),
    };
    let file_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio)
        .label(label);

    let (done, total) = app.overall;
    let overall_ratio = if total > 0 {
        done as f64 / total as f64
    } else {
        0.0
    };
    let overall_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Overall "))
        .gauge_style(Style::default().fg(Color::Blue))
        .ratio(overall_ratio.clamp(0.0, 1.0))
        .label(format!("{}/{}", done, total));

    f.render_widget(file_gauge, chunks[0]);
    f.render_widget(overall_gauge, chunks[1]);
}

/// Render watch folder settings and the monitor status
fn render_monitor(f: &mut Frame, area: Rect, app: &App) {
    let lines = match &app.snapshot {
        Some(s) => {
            let p = &s.preferences;
            vec![
                Line::from(format!(
                    "Folder: {}",
                    p.watch_directory
                        .as_ref()
                        .map(|d| d.display().to_string())
                        .unwrap_or_else(|| "(not set)".to_string())
                )),
                Line::from(format!(
                    "Every {}m | auto-start {} | monitoring {}",
                    p.scan_interval_minutes,
                    on_off(p.auto_start_on_scan),
                    on_off(s.monitoring)
                )),
                Line::from(format!(
                    "Delete originals {} | hw accel {}",
                    on_off(p.auto_delete_verified_originals),
                    on_off(p.use_hardware_acceleration)
                )),
                Line::from(Span::styled(
                    app.monitor_status.clone(),
                    Style::default().fg(Color::Cyan),
                )),
            ]
        }
        None => vec![Line::from("Loading...")],
    };

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Folder monitor "))
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

/// Render CPU and memory usage gauges
fn render_system_gauges(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(3)])
        .split(area);

    let (cpu_percent, mem_percent) = match &app.snapshot {
        Some(s) => (
            s.system.cpu_usage_percent as f64 / 100.0,
            s.system.mem_usage_percent as f64 / 100.0,
        ),
        None => (0.0, 0.0),
    };

    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" CPU "))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(cpu_percent.clamp(0.0, 1.0))
        .label(format!("{:.1}%", cpu_percent * 100.0));

    let mem_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Memory "))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(mem_percent.clamp(0.0, 1.0))
        .label(format!("{:.1}%", mem_percent * 100.0));

    f.render_widget(cpu_gauge, chunks[0]);
    f.render_widget(mem_gauge, chunks[1]);
}

/// Render the tail of the log
fn render_logs(f: &mut Frame, area: Rect, app: &App) {
    let visible = area.height.saturating_sub(2) as usize;
    let start = app.log_lines.len().saturating_sub(visible);
    let lines: Vec<Line> = app
        .log_lines
        .iter()
        .skip(start)
        .map(|l| Line::from(l.as_str()))
        .collect();

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Logs "))
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);
}

/// Render the status line, or the active prompt/confirmation
fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (text, style) = if let Some((kind, buffer)) = &app.prompt {
        (
            format!(" {}: {}_ (Enter to confirm, Esc to cancel)", kind.title(), buffer),
            Style::default().fg(Color::Black).bg(Color::Yellow),
        )
    } else if let Some(confirm) = app.confirm {
        let question = match confirm {
            Confirm::Cancel => "Cancel the running conversion?",
            Confirm::Quit => "A conversion is running. Cancel it and quit?",
        };
        (
            format!(" {} (y/n)", question),
            Style::default().fg(Color::White).bg(Color::Red),
        )
    } else {
        (
            format!(" {} ", app.status),
            Style::default().fg(Color::White).bg(Color::DarkGray),
        )
    };
    f.render_widget(Paragraph::new(text).style(style), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let help = " a add  d remove  c clear  s start  p pause  x cancel  r/1/2 retry failed  \
                e retry selected  f clear failed  w folder  i interval  m monitor  \
                D delete  A auto-start  g hw accel  Tab switch  q quit";
    f.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(Color::Gray))
            .wrap(Wrap { trim: true }),
        area,
    );
}

// ============================================================================
// Main UI Layout
// ============================================================================

/// Render the complete UI layout
fn ui(f: &mut Frame, app: &App) {
    let size = f.area();

    // tabs, content, help, status bar
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(2),
            Constraint::Length(1),
        ])
        .split(size);

    let selected = match app.tab {
        Tab::Converter => 0,
        Tab::Logs => 1,
    };
    let tabs = Tabs::new(vec!["Converter", "Logs"])
        .block(Block::default().borders(Borders::ALL).title(" mkv2mp4 "))
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        .select(selected);
    f.render_widget(tabs, main_chunks[0]);

    match app.tab {
        Tab::Converter => {
            let content_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(main_chunks[1]);

            // Left panel: queue on top, failed list below
            let left_chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(content_chunks[0]);

            let right_chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(6), // file + overall gauges
                    Constraint::Length(6), // monitor panel
                    Constraint::Length(6), // CPU + Memory gauges
                    Constraint::Min(0),
                ])
                .split(content_chunks[1]);

            render_queue(f, left_chunks[0], app);
            render_failed(f, left_chunks[1], app);
            render_progress(f, right_chunks[0], app);
            render_monitor(f, right_chunks[1], app);
            render_system_gauges(f, right_chunks[2], app);
        }
        Tab::Logs => render_logs(f, main_chunks[1], app),
    }

    render_help(f, main_chunks[2]);
    render_status_bar(f, main_chunks[3], app);
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let shutdown_grace = Duration::from_millis(config.timeouts.shutdown_grace_ms);

    let (log_tx, log_rx) = tokio::sync::mpsc::unbounded_channel();
    logging::init(&config.paths.log_file, LogSink::Channel(log_tx));

    let (sink, events) = channel();
    let session = Session::open(config, sink);
    let mut app = App::new(session, events, log_rx);

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app).await;
    restore_terminal(&mut terminal)?;

    println!("Saving state...");
    log::info!("Interface closed, shutting down");
    let App { session, .. } = app;
    session.shutdown(shutdown_grace).await;

    result
}

/// Main application loop
async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
) -> Result<()> {
    let refresh_interval = Duration::from_millis(REFRESH_INTERVAL_MS);
    let mut last_refresh = Instant::now() - refresh_interval; // refresh immediately on start

    loop {
        app.drain();
        if last_refresh.elapsed() >= refresh_interval {
            app.refresh().await;
            last_refresh = Instant::now();
        }

        terminal.draw(|f| ui(f, app))?;

        // Handle input with a short timeout to allow frequent redraws
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if app.on_key(key.code).await {
                        return Ok(());
                    }
                    // show the effect of the action without waiting for the next refresh
                    app.refresh().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_job_gauge_ratio_in_range(percent in proptest::option::of(-50.0f32..250.0), paused in any::<bool>()) {
            let job = JobView {
                label: "a.mkv".to_string(),
                index: 0,
                total: 1,
                elapsed_secs: 12.0,
                percent,
            };
            let (ratio, label) = job_gauge(Some(&job), paused);
            prop_assert!((0.0..=1.0).contains(&ratio));
            prop_assert_eq!(label.ends_with("(paused)"), paused);
        }
    }

    #[test]
    fn test_indeterminate_label() {
        let job = JobView {
            label: "a.mkv".to_string(),
            index: 0,
            total: 3,
            elapsed_secs: 75.0,
            percent: None,
        };
        assert_eq!(job_gauge(Some(&job), false), (0.0, "Working... 1m 15s".to_string()));
        assert_eq!(job_gauge(None, false), (0.0, "Idle".to_string()));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5.0), "5s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3700.0), "1h 1m");
    }
}
