//! Messages from the batch and monitor tasks to whoever owns the UI
//!
//! Background tasks never touch UI state directly; every progress update,
//! job result and monitor status change is sent as an [`Event`].

use crate::policy::RetryLevel;
use crate::verify::Verification;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Counts reported when a batch run ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Jobs dispatched to the encoder (including a cancelled one)
    pub attempted: usize,
    pub succeeded: usize,
    pub newly_failed: usize,
    /// Paths still pending once the run ended
    pub remaining: usize,
    /// Size of the failed list once the run ended
    pub total_failed: usize,
    pub cancelled: bool,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} attempted, {} succeeded, {} newly failed, {} remaining in queue, {} in failed list",
            if self.cancelled { "Batch cancelled" } else { "Batch complete" },
            self.attempted,
            self.succeeded,
            self.newly_failed,
            self.remaining,
            self.total_failed
        )
    }
}

/// Outcome of one job as seen by the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Converted {
        output: PathBuf,
        verification: Verification,
    },
    Failed {
        reason: String,
    },
    Cancelled,
}

/// Why the monitor is waiting instead of scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    NextScan,
    ConversionActive,
    DirectoryNotSet,
}

/// Folder monitor status updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorStatus {
    Started { interval_secs: u64 },
    Scanning { directory: PathBuf },
    Added { count: usize },
    Waiting { reason: WaitReason, remaining_secs: u64 },
    ScanFailed { error: String },
    Stopped,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Started { interval_secs } => {
                write!(f, "Monitoring started (every {}m)", interval_secs / 60)
            }
            MonitorStatus::Scanning { directory } => write!(
                f,
                "Scanning {}...",
                directory
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| directory.display().to_string())
            ),
            MonitorStatus::Added { count } => write!(f, "Added {} file(s) to queue", count),
            MonitorStatus::Waiting {
                reason,
                remaining_secs,
            } => {
                let (m, s) = (remaining_secs / 60, remaining_secs % 60);
                match reason {
                    WaitReason::NextScan => write!(f, "Next scan in {}m {}s", m, s),
                    WaitReason::ConversionActive => write!(
                        f,
                        "Scan paused (conversion active). Next check in {}m {}s",
                        m, s
                    ),
                    WaitReason::DirectoryNotSet => write!(
                        f,
                        "Scan paused (directory not set). Next check in {}m {}s",
                        m, s
                    ),
                }
            }
            MonitorStatus::ScanFailed { error } => write!(f, "Scan failed: {}", error),
            MonitorStatus::Stopped => write!(f, "Monitoring stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BatchStarted {
        total: usize,
    },
    JobStarted {
        path: PathBuf,
        label: String,
        index: usize,
        total: usize,
        level: RetryLevel,
    },
    /// `percent` is None while the duration is unknown
    JobProgress {
        path: PathBuf,
        elapsed_secs: f64,
        percent: Option<f32>,
    },
    JobFinished {
        path: PathBuf,
        result: JobResult,
    },
    OverallProgress {
        processed: usize,
        total: usize,
    },
    /// Output passed the size check
    Verified {
        path: PathBuf,
        verification: Verification,
    },
    OriginalDeleted {
        path: PathBuf,
    },
    DeletionFailed {
        path: PathBuf,
        error: String,
    },
    Paused,
    Resumed,
    CancelRequested,
    BatchFinished(BatchSummary),
    Monitor(MonitorStatus),
}

/// Optional event channel endpoint; sends are dropped when nobody listens
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: Event) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Create a connected sink and its receiver
pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = BatchSummary {
            attempted: 2,
            succeeded: 1,
            newly_failed: 1,
            remaining: 0,
            total_failed: 3,
            cancelled: false,
        };
        assert_eq!(
            summary.to_string(),
            "Batch complete: 2 attempted, 1 succeeded, 1 newly failed, 0 remaining in queue, 3 in failed list"
        );
    }

    #[test]
    fn test_monitor_countdown_display() {
        let status = MonitorStatus::Waiting {
            reason: WaitReason::ConversionActive,
            remaining_secs: 75,
        };
        assert_eq!(
            status.to_string(),
            "Scan paused (conversion active). Next check in 1m 15s"
        );
    }

    #[tokio::test]
    async fn test_sink_delivers_and_tolerates_closed_receiver() {
        let (sink, mut rx) = channel();
        sink.send(Event::Paused);
        assert_eq!(rx.recv().await, Some(Event::Paused));
        drop(rx);
        sink.send(Event::Resumed);
        EventSink::disconnected().send(Event::Resumed);
    }
}
