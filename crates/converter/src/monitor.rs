//! Folder monitor
//!
//! Periodically scans the watch directory and feeds new sources into the
//! queue. Scans are skipped while a batch is running or no directory is set;
//! in both cases the monitor re-checks sooner than the normal interval.

use crate::batch::{BatchSettings, Orchestrator};
use crate::events::{Event, EventSink, MonitorStatus, WaitReason};
use crate::queue::SharedQueue;
use crate::scan::scan_directory;
use crate::state::SharedPreferences;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Countdown status cadence
const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub interval: Duration,
    pub initial_delay: Duration,
    /// Re-check cadence while busy or unconfigured (capped at `interval`)
    pub busy_recheck: Duration,
    pub extensions: Vec<String>,
    /// Verification threshold for auto-started batches
    pub min_output_bytes: u64,
}

pub struct FolderMonitor {
    queue: SharedQueue,
    orchestrator: Arc<Orchestrator>,
    preferences: SharedPreferences,
    events: EventSink,
    options: MonitorOptions,
}

/// Running monitor task
pub struct MonitorHandle {
    stop: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request a stop and wait for the loop to exit
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.join.await {
            warn!("Monitor task ended abnormally: {}", e);
        }
    }
}

impl FolderMonitor {
    pub fn new(
        queue: SharedQueue,
        orchestrator: Arc<Orchestrator>,
        preferences: SharedPreferences,
        events: EventSink,
        options: MonitorOptions,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            preferences,
            events,
            options,
        }
    }

    pub fn spawn(self) -> MonitorHandle {
        let stop = CancellationToken::new();
        let join = tokio::spawn(self.run(stop.clone()));
        MonitorHandle { stop, join }
    }

    async fn run(self, stop: CancellationToken) {
        let interval_secs = self.options.interval.as_secs();
        info!("Folder monitoring started, scanning every {}m", interval_secs / 60);
        self.events
            .send(Event::Monitor(MonitorStatus::Started { interval_secs }));

        let stopped = tokio::select! {
            _ = stop.cancelled() => true,
            _ = tokio::time::sleep(self.options.initial_delay) => false,
        };

        if !stopped {
            let recheck = self.options.busy_recheck.min(self.options.interval);
            loop {
                let (reason, wait) = if self.orchestrator.is_running() {
                    debug!("Conversion active, postponing scan");
                    (WaitReason::ConversionActive, recheck)
                } else {
                    match self.watch_directory().await {
                        Some(dir) => {
                            self.scan_once(&dir).await;
                            (WaitReason::NextScan, self.options.interval)
                        }
                        None => (WaitReason::DirectoryNotSet, recheck),
                    }
                };
                if !self.countdown(reason, wait, &stop).await {
                    break;
                }
            }
        }

        info!("Folder monitoring stopped");
        self.events.send(Event::Monitor(MonitorStatus::Stopped));
    }

    async fn watch_directory(&self) -> Option<PathBuf> {
        self.preferences
            .read()
            .await
            .watch_directory
            .clone()
            .filter(|dir| dir.is_dir())
    }

    /// Scan `dir` once, enqueue what was found and auto-start if enabled.
    /// Returns the number of paths added.
    pub async fn scan_once(&self, dir: &Path) -> usize {
        info!("Scanning {} for new files", dir.display());
        self.events.send(Event::Monitor(MonitorStatus::Scanning {
            directory: dir.to_path_buf(),
        }));

        let root = dir.to_path_buf();
        let extensions = self.options.extensions.clone();
        let found = match tokio::task::spawn_blocking(move || scan_directory(&root, &extensions)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!("Scan of {} failed: {}", dir.display(), e);
                self.events.send(Event::Monitor(MonitorStatus::ScanFailed {
                    error: e.to_string(),
                }));
                return 0;
            }
            Err(e) => {
                warn!("Scan task for {} failed: {}", dir.display(), e);
                self.events.send(Event::Monitor(MonitorStatus::ScanFailed {
                    error: e.to_string(),
                }));
                return 0;
            }
        };

        let added = {
            let mut queue = self.queue.write().await;
            found.into_iter().filter(|p| queue.enqueue(p.clone())).count()
        };
        if added == 0 {
            debug!("No new files in {}", dir.display());
            return 0;
        }

        info!("Added {} file(s) from {}", added, dir.display());
        self.events
            .send(Event::Monitor(MonitorStatus::Added { count: added }));

        let preferences = self.preferences.read().await.clone();
        if preferences.auto_start_on_scan && !self.orchestrator.is_running() {
            let settings =
                BatchSettings::from_preferences(&preferences, self.options.min_output_bytes);
            match self.orchestrator.start(settings).await {
                Ok(_) => info!("Auto-started conversion of new files"),
                Err(e) => warn!("Could not auto-start conversion: {}", e),
            }
        }
        added
    }

    /// Wait `total`, emitting a countdown each second; false when stopped
    async fn countdown(&self, reason: WaitReason, total: Duration, stop: &CancellationToken) -> bool {
        let deadline = Instant::now() + total;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let remaining_secs = (left.as_millis() as u64 + 999) / 1000;
            self.events.send(Event::Monitor(MonitorStatus::Waiting {
                reason,
                remaining_secs,
            }));
            if left.is_zero() {
                return true;
            }
            tokio::select! {
                biased;
                _ = stop.cancelled() => return false,
                _ = tokio::time::sleep(left.min(TICK)) => {}
            }
        }
    }
}
