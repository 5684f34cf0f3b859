//! Logging setup
//!
//! Everything goes to the configured log file at debug level. The headless
//! CLI also logs info and above to the terminal; the TUI instead receives
//! formatted lines over a channel for its Logs tab, since terminal output
//! would tear through the interface.

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

/// Logs above this size are moved aside at startup
pub const ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// Where log lines go besides the log file
pub enum LogSink {
    Terminal,
    Channel(UnboundedSender<String>),
}

/// `io::Write` adapter that sends each complete line over a channel
pub struct ChannelWriter {
    tx: UnboundedSender<String>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx, buf: Vec::new() }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]).trim_end_matches('\r').to_string();
            // receiver gone means the UI is shutting down; keep logging to the file
            let _ = self.tx.send(text);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn log_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build()
}

/// Move `path` to `<path>.old` if it is larger than `limit`
pub fn rotate_if_large(path: &Path, limit: u64) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > limit => {
            let mut old = path.as_os_str().to_owned();
            old.push(".old");
            fs::rename(path, PathBuf::from(old)).is_ok()
        }
        _ => false,
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    rotate_if_large(path, ROTATE_BYTES);
    OpenOptions::new().create(true).append(true).open(path)
}

/// Initialise the global logger. Returns the log file path when file
/// logging could be set up.
pub fn init(log_file: &Path, sink: LogSink) -> Option<PathBuf> {
    let config = log_config();
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    match sink {
        LogSink::Terminal => loggers.push(TermLogger::new(
            LevelFilter::Info,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )),
        LogSink::Channel(tx) => {
            loggers.push(WriteLogger::new(LevelFilter::Info, config.clone(), ChannelWriter::new(tx)))
        }
    }

    let file_path = match open_log_file(log_file) {
        Ok(file) => {
            loggers.push(WriteLogger::new(LevelFilter::Debug, config, file));
            Some(log_file.to_path_buf())
        }
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {}", log_file.display(), e);
            None
        }
    };

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Warning: Logger already initialized");
    }

    log::info!("=== mkv2mp4 session started ===");
    if let Some(path) = &file_path {
        log::info!("Log file: {}", path.display());
    }
    file_path
}

/// Last `n` lines of the log file
pub fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let content = fs::read(path)?;
    let text = String::from_utf8_lossy(&content);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[test]
    fn test_channel_writer_splits_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut writer = ChannelWriter::new(tx);
        write!(writer, "first line\nsecond ").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "first line");
        assert!(rx.try_recv().is_err());
        write!(writer, "half\r\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "second half");
    }

    #[test]
    fn test_channel_writer_survives_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut writer = ChannelWriter::new(tx);
        assert!(writeln!(writer, "nobody listening").is_ok());
    }

    #[test]
    fn test_rotation_threshold() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, vec![b'x'; 64]).unwrap();

        assert!(!rotate_if_large(&log, 64));
        assert!(log.exists());
        assert!(rotate_if_large(&log, 63));
        assert!(!log.exists());
        assert!(dir.path().join("app.log.old").exists());
        assert!(!rotate_if_large(&dir.path().join("missing.log"), 0));
    }

    #[test]
    fn test_tail_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "a\nb\nc\nd\n").unwrap();
        assert_eq!(tail_lines(&log, 2).unwrap(), vec!["c", "d"]);
        assert_eq!(tail_lines(&log, 10).unwrap().len(), 4);
        assert!(tail_lines(&dir.path().join("missing.log"), 3).is_err());
    }
}
