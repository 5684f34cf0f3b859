//! Batch orchestration
//!
//! A batch converts a snapshot of the pending queue, one file at a time.
//! Each path is re-checked against the live queue before it is dispatched,
//! so removals made while the batch runs are honoured. Results flow back into
//! the shared queue (completed paths leave it, failures move to the failed
//! list) and to the UI as [`Event`]s.

use crate::control::RunContext;
use crate::encode::{EncodeOutcome, Encoder};
use crate::events::{BatchSummary, Event, EventSink, JobResult};
use crate::policy::profile_for;
use crate::queue::{display_label, SharedQueue};
use crate::startup::{check_tools, ToolError};
use crate::state::Preferences;
use crate::verify::verify_output;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("the queue is empty")]
    QueueEmpty,

    #[error(transparent)]
    ToolUnavailable(#[from] ToolError),

    #[error("a batch is already running")]
    AlreadyRunning,
}

/// Settings captured when a batch starts; later preference changes apply to
/// the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub hardware_accel: bool,
    pub auto_delete_originals: bool,
    pub min_output_bytes: u64,
}

impl BatchSettings {
    pub fn from_preferences(preferences: &Preferences, min_output_bytes: u64) -> Self {
        Self {
            hardware_accel: preferences.use_hardware_acceleration,
            auto_delete_originals: preferences.auto_delete_verified_originals,
            min_output_bytes,
        }
    }
}

/// Clears the running flag when the batch task ends, however it ends
struct RunningGuard(Arc<watch::Sender<bool>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// Starts batches over the shared queue. At most one batch runs at a time.
pub struct Orchestrator {
    queue: SharedQueue,
    encoder: Arc<Encoder>,
    events: EventSink,
    running: Arc<watch::Sender<bool>>,
    current: Mutex<Option<RunContext>>,
    cancel_grace: Duration,
}

impl Orchestrator {
    pub fn new(
        queue: SharedQueue,
        encoder: Arc<Encoder>,
        events: EventSink,
        cancel_grace: Duration,
    ) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            queue,
            encoder,
            events,
            running: Arc::new(running),
            current: Mutex::new(None),
            cancel_grace,
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn encoder(&self) -> &Arc<Encoder> {
        &self.encoder
    }

    /// Pause/cancel controls of the running batch, None when idle
    pub async fn current(&self) -> Option<RunContext> {
        if !self.is_running() {
            return None;
        }
        self.current.lock().await.clone()
    }

    /// Wait until no batch is running; false if `timeout` elapsed first
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.running.subscribe();
        let idle = match tokio::time::timeout(timeout, rx.wait_for(|running| !*running)).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        };
        idle
    }

    /// Start converting everything currently pending.
    ///
    /// Fails without side effects if a batch is already running, the queue
    /// is empty or ffmpeg cannot be run.
    pub async fn start(&self, settings: BatchSettings) -> Result<BatchHandle, BatchError> {
        let claimed = self.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !claimed {
            return Err(BatchError::AlreadyRunning);
        }
        let guard = RunningGuard(Arc::clone(&self.running));

        let snapshot = self.queue.read().await.pending().to_vec();
        if snapshot.is_empty() {
            return Err(BatchError::QueueEmpty);
        }
        check_tools(self.encoder.tools()).await?;

        let ctx = RunContext::new(self.cancel_grace);
        *self.current.lock().await = Some(ctx.clone());
        let run = BatchRun {
            queue: Arc::clone(&self.queue),
            encoder: Arc::clone(&self.encoder),
            events: self.events.clone(),
            ctx: ctx.clone(),
            settings,
        };
        let join = tokio::spawn(run.execute(snapshot, guard));

        Ok(BatchHandle { ctx, join })
    }
}

/// Handle to a running batch
pub struct BatchHandle {
    ctx: RunContext,
    join: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Pause and cancel controls for the running batch
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the batch to end and return its summary
    pub async fn wait(self) -> BatchSummary {
        match self.join.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Batch task ended abnormally: {}", e);
                BatchSummary {
                    cancelled: true,
                    ..BatchSummary::default()
                }
            }
        }
    }
}

struct BatchRun {
    queue: SharedQueue,
    encoder: Arc<Encoder>,
    events: EventSink,
    ctx: RunContext,
    settings: BatchSettings,
}

impl BatchRun {
    async fn execute(self, snapshot: Vec<PathBuf>, guard: RunningGuard) -> BatchSummary {
        let total = snapshot.len();
        info!("Starting batch of {} file(s)", total);
        self.events.send(Event::BatchStarted { total });

        let mut attempted = 0;
        let mut finished = 0;
        let mut skipped = 0;
        let mut newly_failed = 0;
        let mut cancelled = false;

        for (index, path) in snapshot.iter().enumerate() {
            if self.ctx.is_cancelled() {
                cancelled = true;
                break;
            }

            let level = {
                let queue = self.queue.read().await;
                queue.is_pending(path).then(|| queue.level_for(path))
            };
            let Some(level) = level else {
                debug!("{} left the queue before its turn, skipping", path.display());
                skipped += 1;
                self.events.send(Event::OverallProgress {
                    processed: finished + skipped,
                    total,
                });
                continue;
            };

            attempted += 1;
            let label = display_label(path, level);
            info!("[{}/{}] Converting {}", index + 1, total, label);
            self.events.send(Event::JobStarted {
                path: path.clone(),
                label,
                index,
                total,
                level,
            });

            let profile = profile_for(level, self.settings.hardware_accel);
            let events = self.events.clone();
            let outcome = self
                .encoder
                .run(path, &profile, &self.ctx, |p| {
                    events.send(Event::JobProgress {
                        path: path.clone(),
                        elapsed_secs: p.elapsed,
                        percent: p.percent,
                    })
                })
                .await;

            let result = match outcome {
                EncodeOutcome::Cancelled => {
                    // stays pending; the marker only governed this attempt
                    self.queue.write().await.clear_marker(path);
                    info!("Conversion of {} cancelled", path.display());
                    self.events.send(Event::JobFinished {
                        path: path.clone(),
                        result: JobResult::Cancelled,
                    });
                    cancelled = true;
                    break;
                }
                EncodeOutcome::Failed { reason } => {
                    error!("Conversion of {} failed: {}", path.display(), reason);
                    self.queue
                        .write()
                        .await
                        .push_failed(path.clone(), reason.clone());
                    newly_failed += 1;
                    JobResult::Failed { reason }
                }
                EncodeOutcome::Success { output } => {
                    self.queue.write().await.complete(path);
                    self.finish_success(path, output)
                }
            };
            finished += 1;

            self.events.send(Event::JobFinished {
                path: path.clone(),
                result,
            });
            self.events.send(Event::OverallProgress {
                processed: finished + skipped,
                total,
            });
        }

        let (remaining, total_failed) = {
            let queue = self.queue.read().await;
            (queue.len(), queue.failed().len())
        };
        let summary = BatchSummary {
            attempted,
            succeeded: finished - newly_failed,
            newly_failed,
            remaining,
            total_failed,
            cancelled,
        };
        info!("{}", summary);

        // a listener reacting to BatchFinished must be able to start the next batch
        drop(guard);
        self.events.send(Event::BatchFinished(summary));
        summary
    }

    /// Verify the output and, when enabled, delete the verified original
    fn finish_success(&self, source: &Path, output: PathBuf) -> JobResult {
        let verification = verify_output(&output, self.settings.min_output_bytes);
        if !verification.is_ok() {
            warn!(
                "Converted {} but {}: {}; keeping the original",
                source.display(),
                output.display(),
                verification
            );
            return JobResult::Converted {
                output,
                verification,
            };
        }

        info!("Converted {} -> {} ({})", source.display(), output.display(), verification);
        self.events.send(Event::Verified {
            path: output.clone(),
            verification: verification.clone(),
        });
        if self.settings.auto_delete_originals {
            match std::fs::remove_file(source) {
                Ok(()) => {
                    info!("Deleted original {}", source.display());
                    self.events.send(Event::OriginalDeleted {
                        path: source.to_path_buf(),
                    });
                }
                Err(e) => {
                    error!("Could not delete original {}: {}", source.display(), e);
                    self.events.send(Event::DeletionFailed {
                        path: source.to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }

        JobResult::Converted {
            output,
            verification,
        }
    }
}
