//! Session facade
//!
//! One object holding everything a front end needs: the shared queue, the
//! user preferences, the batch orchestrator and the optional folder monitor.
//! Every user action of the CLI and TUI goes through here, so the rules
//! about what is allowed while a batch runs live in one place.

use crate::batch::{BatchError, BatchHandle, BatchSettings, Orchestrator};
use crate::config::Config;
use crate::encode::{Encoder, SysinfoControl};
use crate::events::{Event, EventSink};
use crate::monitor::{FolderMonitor, MonitorHandle, MonitorOptions};
use crate::policy::RetryLevel;
use crate::queue::{new_shared_queue, SharedQueue};
use crate::startup::{resolve_tools, ToolPaths};
use crate::state::{self, PersistedState, Preferences, SharedPreferences};
use crate::status::{StatusSnapshot, SystemMetrics};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Extra time allowed at shutdown on top of the termination grace
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a conversion is running, wait for it to finish or cancel it first")]
    BatchActive,

    #[error("no conversion is running")]
    NotRunning,

    #[error("pausing is not supported on this platform")]
    PauseUnsupported,

    #[error("scan interval must be a positive number of minutes")]
    InvalidInterval,

    #[error("folder monitoring is already running")]
    MonitorActive,

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Result of adding a selection of paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReport {
    pub requested: usize,
    pub added: usize,
}

impl EnqueueReport {
    /// Non-empty selection where every path was already queued or failed
    pub fn all_duplicates(&self) -> bool {
        self.requested > 0 && self.added == 0
    }
}

pub struct Session {
    config: Config,
    queue: SharedQueue,
    preferences: SharedPreferences,
    orchestrator: Arc<Orchestrator>,
    events: EventSink,
    monitor: Option<MonitorHandle>,
}

impl Session {
    pub fn new(config: Config, tools: ToolPaths, restored: PersistedState, events: EventSink) -> Self {
        let queue = new_shared_queue(restored.queue);
        let encoder = Encoder::new(
            tools,
            Arc::new(SysinfoControl),
            Duration::from_millis(config.timeouts.idle_poll_ms),
        );
        let orchestrator = Orchestrator::new(
            Arc::clone(&queue),
            Arc::new(encoder),
            events.clone(),
            Duration::from_millis(config.timeouts.cancel_grace_ms),
        );
        Self {
            config,
            queue,
            preferences: Arc::new(RwLock::new(restored.preferences)),
            orchestrator: Arc::new(orchestrator),
            events,
            monitor: None,
        }
    }

    /// Resolve the tools and restore the saved state named by `config`
    pub fn open(config: Config, events: EventSink) -> Self {
        let tools = resolve_tools(&config);
        info!(
            "Using ffmpeg at {} and ffprobe at {}",
            tools.ffmpeg.display(),
            tools.ffprobe.display()
        );
        let restored = state::load(&config.paths.state_file);
        Self::new(config, tools, restored, events)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn tools(&self) -> &ToolPaths {
        self.orchestrator.encoder().tools()
    }

    pub async fn preferences(&self) -> Preferences {
        self.preferences.read().await.clone()
    }

    pub fn is_converting(&self) -> bool {
        self.orchestrator.is_running()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| !m.is_finished())
    }

    /// True if the running batch is paused
    pub async fn is_paused(&self) -> bool {
        match self.orchestrator.current().await {
            Some(ctx) => ctx.is_paused(),
            None => false,
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.orchestrator.is_running() {
            return Err(SessionError::BatchActive);
        }
        Ok(())
    }

    pub async fn enqueue_paths<I>(&self, paths: I) -> Result<EnqueueReport, SessionError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.ensure_idle()?;
        let mut queue = self.queue.write().await;
        let mut report = EnqueueReport {
            requested: 0,
            added: 0,
        };
        for path in paths {
            report.requested += 1;
            if queue.enqueue(path) {
                report.added += 1;
            }
        }
        if report.all_duplicates() {
            info!("No files added, all already queued or failed");
        } else {
            info!("Added {} file(s) to the queue", report.added);
        }
        Ok(report)
    }

    pub async fn remove(&self, path: &Path) -> Result<bool, SessionError> {
        self.ensure_idle()?;
        Ok(self.queue.write().await.remove(path))
    }

    pub async fn remove_at(&self, index: usize) -> Result<Option<PathBuf>, SessionError> {
        self.ensure_idle()?;
        Ok(self.queue.write().await.remove_at(index))
    }

    /// Empty the pending queue, returns how many paths were dropped
    pub async fn clear_queue(&self) -> Result<usize, SessionError> {
        self.ensure_idle()?;
        let mut queue = self.queue.write().await;
        let dropped = queue.len();
        queue.clear();
        info!("Cleared {} file(s) from the queue", dropped);
        Ok(dropped)
    }

    /// Send every failed path back to the queue at `level`
    pub async fn retry_failed(&self, level: RetryLevel) -> Result<usize, SessionError> {
        self.ensure_idle()?;
        let moved = self.queue.write().await.requeue_all_failed(level);
        info!("Re-queued {} failed file(s) at {}", moved, level);
        Ok(moved)
    }

    /// Queue one failed path at `level`. A path that is already pending only
    /// has its level changed. False when the path is neither failed nor pending.
    pub async fn retry_path(&self, path: &Path, level: RetryLevel) -> Result<bool, SessionError> {
        self.ensure_idle()?;
        let mut queue = self.queue.write().await;
        if !queue.is_failed(path) && !queue.is_pending(path) {
            debug!("Retry ignored, {} is not a failed file", path.display());
            return Ok(false);
        }
        queue.requeue_from_failed(path, level);
        info!("Re-queued {} at {}", path.display(), level);
        Ok(true)
    }

    pub async fn clear_failed(&self) -> Result<usize, SessionError> {
        self.ensure_idle()?;
        let mut queue = self.queue.write().await;
        let dropped = queue.failed().len();
        queue.clear_failed();
        Ok(dropped)
    }

    /// Batch settings from the current preferences
    pub async fn batch_settings(&self) -> BatchSettings {
        let preferences = self.preferences.read().await;
        BatchSettings::from_preferences(&preferences, self.config.verify.min_output_bytes)
    }

    pub async fn start_batch(&self) -> Result<BatchHandle, SessionError> {
        let settings = self.batch_settings().await;
        Ok(self.orchestrator.start(settings).await?)
    }

    /// Pause or resume the running batch, returns the new paused state
    pub async fn toggle_pause(&self) -> Result<bool, SessionError> {
        let ctx = self
            .orchestrator
            .current()
            .await
            .ok_or(SessionError::NotRunning)?;
        if !self.orchestrator.encoder().can_suspend() {
            return Err(SessionError::PauseUnsupported);
        }
        let paused = ctx.toggle_pause();
        if paused {
            info!("Conversion paused");
            self.events.send(Event::Paused);
        } else {
            info!("Conversion resumed");
            self.events.send(Event::Resumed);
        }
        Ok(paused)
    }

    pub async fn cancel_batch(&self) -> Result<(), SessionError> {
        let ctx = self
            .orchestrator
            .current()
            .await
            .ok_or(SessionError::NotRunning)?;
        info!("Cancelling conversion");
        ctx.cancel();
        self.events.send(Event::CancelRequested);
        Ok(())
    }

    /// Replace the preferences; batch settings apply from the next batch
    pub async fn set_preferences(&self, preferences: Preferences) {
        *self.preferences.write().await = preferences;
    }

    pub async fn update_preferences<F>(&self, update: F) -> Preferences
    where
        F: FnOnce(&mut Preferences),
    {
        let mut preferences = self.preferences.write().await;
        update(&mut preferences);
        preferences.clone()
    }

    pub async fn start_monitor(&mut self) -> Result<(), SessionError> {
        if self.is_monitoring() {
            return Err(SessionError::MonitorActive);
        }
        let minutes = self.preferences.read().await.scan_interval_minutes;
        if minutes == 0 {
            return Err(SessionError::InvalidInterval);
        }

        let monitor_cfg = &self.config.monitor;
        let options = MonitorOptions {
            interval: Duration::from_secs(minutes * 60),
            initial_delay: Duration::from_secs(monitor_cfg.initial_delay_secs),
            busy_recheck: Duration::from_secs(monitor_cfg.busy_recheck_secs),
            extensions: monitor_cfg.extensions.clone(),
            min_output_bytes: self.config.verify.min_output_bytes,
        };
        let monitor = FolderMonitor::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.preferences),
            self.events.clone(),
            options,
        );
        self.monitor = Some(monitor.spawn());
        Ok(())
    }

    /// Stop the monitor, false if it was not running
    pub async fn stop_monitor(&mut self) -> bool {
        match self.monitor.take() {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn status(&self, system: SystemMetrics) -> StatusSnapshot {
        let queue = self.queue.read().await;
        let preferences = self.preferences.read().await;
        StatusSnapshot::new(
            &queue,
            &preferences,
            self.is_converting(),
            self.is_monitoring(),
            system,
        )
    }

    /// Write the state file named in the configuration
    pub async fn save(&self) -> bool {
        let queue = self.queue.read().await;
        let preferences = self.preferences.read().await;
        state::save_or_log(&self.config.paths.state_file, &queue, &preferences)
    }

    /// Stop everything and persist the state.
    ///
    /// A running batch is cancelled with `grace` as its termination window;
    /// the job it was on stays pending.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.stop_monitor().await;
        if let Some(ctx) = self.orchestrator.current().await {
            info!("Shutting down, cancelling the running conversion");
            ctx.cancel_with_grace(grace);
            if !self.orchestrator.wait_idle(grace + SHUTDOWN_MARGIN).await {
                warn!("Conversion did not stop within {:?}, saving state anyway", grace);
            }
        }
        self.save().await
    }
}
