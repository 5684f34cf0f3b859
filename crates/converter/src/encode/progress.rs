//! ffmpeg diagnostic stream parsing
//!
//! ffmpeg rewrites its status line in place with carriage returns, so the
//! stream is split on both `\r` and `\n`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("valid time regex")
});

/// Number of diagnostic lines kept for failure reasons
pub const TAIL_LINES: usize = 5;

/// Extract the elapsed time marker from a status line, in seconds
pub fn parse_elapsed(line: &str) -> Option<f64> {
    let caps = TIME_PATTERN.captures(line)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let hours = field(1)?;
    let minutes = field(2)?;
    let seconds = field(3)?;
    let hundredths = field(4)?;
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds as f64 + hundredths as f64 / 100.0)
}

/// Convert elapsed seconds into a percentage of the known duration
///
/// Returns None when the duration is unknown.
pub fn percent(elapsed: f64, duration: Option<f64>) -> Option<f32> {
    let duration = duration.filter(|d| *d > 0.0)?;
    Some(((elapsed / duration) * 100.0).clamp(0.0, 100.0) as f32)
}

/// Splits an async byte stream into lines on `\r` or `\n`.
///
/// `next_line` only awaits on `fill_buf`, so dropping it mid-await (for
/// example inside `select!`) never loses bytes.
pub struct DiagnosticLines<R> {
    reader: R,
    partial: Vec<u8>,
    eof: bool,
}

impl<R: AsyncBufRead + Unpin> DiagnosticLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            partial: Vec::new(),
            eof: false,
        }
    }

    /// Next non-empty line, or None at end of stream
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if self.eof {
                if self.partial.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.partial);
                let line = String::from_utf8_lossy(&rest).trim().to_string();
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(line));
            }

            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                self.eof = true;
                continue;
            }
            let n = buf.len();
            self.partial.extend_from_slice(buf);
            self.reader.consume(n);
        }
    }

    fn take_line(&mut self) -> Option<String> {
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let rest = self.partial.split_off(pos + 1);
            let raw = std::mem::replace(&mut self.partial, rest);
            let line = String::from_utf8_lossy(&raw[..pos]).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}

/// Ring buffer of the most recent diagnostic lines
#[derive(Debug, Clone)]
pub struct LineTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LineTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn joined(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}
