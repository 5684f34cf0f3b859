//! Headless command line for the mkv2mp4 batch converter
//!
//! Every subcommand restores the saved state, acts on it and saves it again,
//! so the CLI and the TUI can be used on the same queue.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mkv2mp4::logging::{self, LogSink};
use mkv2mp4::{
    channel, collect_system_metrics, Config, Event, EventSink, JobResult, MonitorStatus,
    RetryLevel, Session,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// mkv2mp4 - batch convert videos to MP4 with ffmpeg
#[derive(Parser, Debug)]
#[command(name = "mkv2mp4")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mkv2mp4.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add files to the queue
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Remove a file from the queue
    Remove { path: PathBuf },
    /// Empty the queue
    Clear,
    /// Empty the failed list
    ClearFailed,
    /// Send failed files back to the queue
    Retry {
        /// Escalation level (0 = standard, 1 = tolerant, 2 = salvage)
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        level: u8,
        /// Failed files to retry (all when omitted)
        paths: Vec<PathBuf>,
    },
    /// Show the queue, the failed list and preferences
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Convert everything in the queue
    Run,
    /// Watch a folder and queue new files until interrupted
    Watch {
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Minutes between scans
        #[arg(long)]
        interval: Option<u64>,
        /// Start converting as soon as a scan finds files
        #[arg(long)]
        auto_start: bool,
    },
    /// Print the end of the log file
    Logs {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
        #[arg(short, long)]
        follow: bool,
    },
    /// Change preferences
    Prefs {
        #[arg(long)]
        watch_dir: Option<PathBuf>,
        #[arg(long)]
        auto_delete: Option<bool>,
        /// Minutes between scans
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        auto_start: Option<bool>,
        #[arg(long)]
        hwaccel: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // `logs` reads the file, so it must not append a session banner to it
    if !matches!(args.command, Command::Logs { .. }) {
        logging::init(&config.paths.log_file, LogSink::Terminal);
    }
    let shutdown_grace = Duration::from_millis(config.timeouts.shutdown_grace_ms);

    match args.command {
        Command::Add { paths } => {
            let session = Session::open(config, EventSink::disconnected());
            let report = session.enqueue_paths(paths).await?;
            if report.all_duplicates() {
                println!("No files added (already queued or failed)");
            } else {
                println!("Added {} of {} file(s)", report.added, report.requested);
            }
            session.save().await;
        }
        Command::Remove { path } => {
            let session = Session::open(config, EventSink::disconnected());
            if !session.remove(&path).await? {
                println!("{} is not in the queue", path.display());
            }
            session.save().await;
        }
        Command::Clear => {
            let session = Session::open(config, EventSink::disconnected());
            println!("Removed {} file(s) from the queue", session.clear_queue().await?);
            session.save().await;
        }
        Command::ClearFailed => {
            let session = Session::open(config, EventSink::disconnected());
            println!("Removed {} failed file(s)", session.clear_failed().await?);
            session.save().await;
        }
        Command::Retry { level, paths } => {
            let level = RetryLevel::from_u8(level).context("invalid retry level")?;
            let session = Session::open(config, EventSink::disconnected());
            if paths.is_empty() {
                let moved = session.retry_failed(level).await?;
                println!("Re-queued {} file(s) at {}", moved, level);
            } else {
                for path in &paths {
                    if !session.retry_path(path, level).await? {
                        println!("{} is not in the failed list", path.display());
                    }
                }
            }
            session.save().await;
        }
        Command::Status { json } => {
            let session = Session::open(config, EventSink::disconnected());
            let status = session.status(collect_system_metrics()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Queue ({}):", status.queue.len());
                for item in &status.queue {
                    println!("  {}  [{}]", item.label, item.path.display());
                }
                println!("Failed ({}):", status.failed.len());
                for item in &status.failed {
                    println!("  {}", item.path.display());
                    for line in item.reason.lines() {
                        println!("      {}", line);
                    }
                }
                let p = &status.preferences;
                println!("Preferences:");
                println!(
                    "  watch directory: {}",
                    p.watch_directory
                        .as_ref()
                        .map(|d| d.display().to_string())
                        .unwrap_or_else(|| "(not set)".to_string())
                );
                println!("  scan interval: {} min", p.scan_interval_minutes);
                println!("  auto-start on scan: {}", p.auto_start_on_scan);
                println!("  delete verified originals: {}", p.auto_delete_verified_originals);
                println!("  hardware acceleration: {}", p.use_hardware_acceleration);
            }
        }
        Command::Run => run_batch(config, shutdown_grace).await?,
        Command::Watch {
            dir,
            interval,
            auto_start,
        } => watch(config, dir, interval, auto_start, shutdown_grace).await?,
        Command::Prefs {
            watch_dir,
            auto_delete,
            interval,
            auto_start,
            hwaccel,
        } => {
            if interval == Some(0) {
                bail!("scan interval must be a positive number of minutes");
            }
            if let Some(dir) = &watch_dir {
                if !dir.is_dir() {
                    bail!("{} is not a directory", dir.display());
                }
            }
            let session = Session::open(config, EventSink::disconnected());
            let prefs = session
                .update_preferences(|p| {
                    if let Some(dir) = watch_dir {
                        p.watch_directory = Some(dir);
                    }
                    if let Some(v) = auto_delete {
                        p.auto_delete_verified_originals = v;
                    }
                    if let Some(v) = interval {
                        p.scan_interval_minutes = v;
                    }
                    if let Some(v) = auto_start {
                        p.auto_start_on_scan = v;
                    }
                    if let Some(v) = hwaccel {
                        p.use_hardware_acceleration = v;
                    }
                })
                .await;
            println!("{:#?}", prefs);
            session.save().await;
        }
        Command::Logs { lines, follow } => {
            show_logs(&config.paths.log_file, lines, follow).await?
        }
    }

    Ok(())
}

async fn run_batch(config: Config, shutdown_grace: Duration) -> Result<()> {
    let (sink, mut rx) = channel();
    let session = Session::open(config, sink);
    let handle = match session.start_batch().await {
        Ok(h) => h,
        Err(e) => {
            session.save().await;
            return Err(e).context("could not start the batch");
        }
    };

    let mut cancel_sent = false;
    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                let finished = matches!(event, Event::BatchFinished(_));
                print_event(&event);
                if finished {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                println!("\nCancelling, the current file stays in the queue...");
                log::info!("Interrupted, cancelling the batch");
                let _ = session.cancel_batch().await;
                cancel_sent = true;
            }
            else => break,
        }
    }

    handle.wait().await;
    session.shutdown(shutdown_grace).await;
    Ok(())
}

async fn watch(
    config: Config,
    dir: Option<PathBuf>,
    interval: Option<u64>,
    auto_start: bool,
    shutdown_grace: Duration,
) -> Result<()> {
    let (sink, mut rx) = channel();
    let mut session = Session::open(config, sink);
    if let Some(dir) = &dir {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
    }
    session
        .update_preferences(|p| {
            if let Some(dir) = dir {
                p.watch_directory = Some(dir);
            }
            if let Some(minutes) = interval {
                p.scan_interval_minutes = minutes;
            }
            if auto_start {
                p.auto_start_on_scan = true;
            }
        })
        .await;
    session.start_monitor().await?;
    println!("Watching, press Ctrl-C to stop");

    loop {
        tokio::select! {
            Some(event) = rx.recv() => print_event(&event),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\nStopping...");
    log::info!("Interrupted, stopping the monitor");
    session.shutdown(shutdown_grace).await;
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::BatchStarted { total } => println!("Converting {} file(s)", total),
        Event::JobStarted {
            label, index, total, ..
        } => println!("[{}/{}] {}", index + 1, total, label),
        Event::JobProgress {
            elapsed_secs,
            percent,
            ..
        } => {
            match percent {
                Some(p) => print!("\r  {:5.1}%", p),
                None => print!("\r  {:.0}s encoded", elapsed_secs),
            }
            let _ = std::io::stdout().flush();
        }
        Event::JobFinished { result, .. } => match result {
            JobResult::Converted {
                output,
                verification,
            } => println!("\r  done: {} ({})", output.display(), verification),
            JobResult::Failed { reason } => {
                println!("\r  failed:");
                for line in reason.lines() {
                    println!("    {}", line);
                }
            }
            JobResult::Cancelled => println!("\r  cancelled"),
        },
        Event::OriginalDeleted { path } => println!("  deleted original {}", path.display()),
        Event::DeletionFailed { path, error } => {
            println!("  could not delete {}: {}", path.display(), error)
        }
        Event::BatchFinished(summary) => println!("{}", summary),
        Event::Monitor(status) => match status {
            // one line per minute is enough on a terminal
            MonitorStatus::Waiting { remaining_secs, .. } if remaining_secs % 60 != 0 => {}
            other => println!("{}", other),
        },
        Event::OverallProgress { .. }
        | Event::Verified { .. }
        | Event::Paused
        | Event::Resumed
        | Event::CancelRequested => {}
    }
}

async fn show_logs(path: &Path, lines: usize, follow: bool) -> Result<()> {
    let tail = logging::tail_lines(path, lines)
        .with_context(|| format!("reading {}", path.display()))?;
    for line in tail {
        println!("{}", line);
    }
    if !follow {
        return Ok(());
    }

    let mut offset = tokio::fs::metadata(path).await?.len();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        let len = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        if len < offset {
            // rotated
            offset = 0;
        }
        if len == offset {
            continue;
        }
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        offset += buf.len() as u64;
        print!("{}", String::from_utf8_lossy(&buf));
        std::io::stdout().flush()?;
    }
}
