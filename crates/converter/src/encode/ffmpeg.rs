//! ffmpeg encoder driver
//!
//! Runs one conversion per call: probes the duration, spawns ffmpeg with the
//! profile chosen by the retry policy, turns `time=` markers on stderr into
//! progress callbacks and honours pause/cancel requests from the
//! [`RunContext`].

use super::process::{ProcessControl, ProcessState};
use super::progress::{parse_elapsed, percent, DiagnosticLines, LineTail, TAIL_LINES};
use crate::control::RunContext;
use crate::policy::{output_path_for, EncoderProfile};
use crate::startup::ToolPaths;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, Command};

/// Result of a single conversion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// ffmpeg exited with status 0
    Success { output: PathBuf },
    /// ffmpeg failed or could not be run; `reason` carries the stderr tail
    Failed { reason: String },
    /// Stopped on request, partial output removed
    Cancelled,
}

/// Progress sample reported for every `time=` marker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Elapsed media time in seconds
    pub elapsed: f64,
    /// Percentage of the probed duration, None when the duration is unknown
    pub percent: Option<f32>,
}

/// Parse ffprobe's `format=duration` output
///
/// Non-positive and non-numeric values count as unknown.
pub fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Drives ffmpeg/ffprobe child processes.
pub struct Encoder {
    tools: ToolPaths,
    control: Arc<dyn ProcessControl>,
    idle_poll: Duration,
}

impl Encoder {
    pub fn new(tools: ToolPaths, control: Arc<dyn ProcessControl>, idle_poll: Duration) -> Self {
        Self {
            tools,
            control,
            idle_poll,
        }
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Whether pausing can suspend the encoder on this platform
    pub fn can_suspend(&self) -> bool {
        self.control.can_suspend()
    }

    /// Media duration in seconds, None if it cannot be determined
    pub async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let output = Command::new(&self.tools.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                warn!("Could not run ffprobe for {}: {}", input.display(), e);
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                "ffprobe failed for {} (exit code {:?})",
                input.display(),
                output.status.code()
            );
            return None;
        }

        let duration = parse_duration(&String::from_utf8_lossy(&output.stdout));
        if duration.is_none() {
            warn!(
                "Could not determine a valid duration for {}, progress will be indeterminate",
                input.display()
            );
        }
        duration
    }

    /// Convert `input` with `profile`
    ///
    /// Never returns an error: every failure mode is folded into the outcome.
    /// The child is always stopped before this returns, and `kill_on_drop`
    /// covers the case where the future itself is dropped.
    pub async fn run<F>(
        &self,
        input: &Path,
        profile: &EncoderProfile,
        ctx: &RunContext,
        mut on_progress: F,
    ) -> EncodeOutcome
    where
        F: FnMut(Progress),
    {
        let prefix = profile.level.error_prefix();
        let output = output_path_for(input, profile.level);

        if output == input {
            return EncodeOutcome::Failed {
                reason: format!(
                    "{}output path {} would overwrite the source",
                    prefix,
                    output.display()
                ),
            };
        }
        if ctx.is_cancelled() {
            return EncodeOutcome::Cancelled;
        }

        let duration = self.probe_duration(input).await;
        if ctx.is_cancelled() {
            return EncodeOutcome::Cancelled;
        }

        info!(
            "Converting {} -> {} ({}, {})",
            input.display(),
            output.display(),
            profile.level,
            profile.codec.name()
        );

        let args = profile.build_args(input, &output);
        debug!(
            "Executing: {} {}",
            self.tools.ffmpeg.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = match Command::new(&self.tools.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {}: {}", self.tools.ffmpeg.display(), e);
                return EncodeOutcome::Failed {
                    reason: format!("{}failed to run ffmpeg: {}", prefix, e),
                };
            }
        };
        let pid = child.id();

        let stderr = match child.stderr.take() {
            Some(s) => s,
            None => {
                self.stop_child(&mut child, pid, false, ctx.grace()).await;
                return EncodeOutcome::Failed {
                    reason: format!("{}failed to run ffmpeg: stderr not captured", prefix),
                };
            }
        };

        let mut lines = DiagnosticLines::new(BufReader::new(stderr));
        let mut tail = LineTail::new(TAIL_LINES);
        let mut pause_rx = ctx.subscribe_pause();
        let mut pause_open = true;
        let mut suspended = false;
        let mut ticker = tokio::time::interval(self.idle_poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // A pause requested between jobs applies as soon as the process exists
        if ctx.is_paused() {
            suspended = self.apply_pause(pid, suspended, true);
        }

        loop {
            tokio::select! {
                biased;

                _ = ctx.cancelled() => {
                    info!("Cancellation requested during conversion of {}", input.display());
                    self.stop_child(&mut child, pid, suspended, ctx.grace()).await;
                    remove_partial(&output);
                    return EncodeOutcome::Cancelled;
                }

                changed = pause_rx.changed(), if pause_open => {
                    if changed.is_err() {
                        pause_open = false;
                        continue;
                    }
                    let want = *pause_rx.borrow_and_update();
                    suspended = self.apply_pause(pid, suspended, want);
                }

                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(elapsed) = parse_elapsed(&line) {
                            on_progress(Progress { elapsed, percent: percent(elapsed, duration) });
                        }
                        tail.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error reading ffmpeg output: {}", e);
                        break;
                    }
                },

                // stderr can outlive ffmpeg when a grandchild inherited it
                _ = ticker.tick(), if !suspended => {
                    if let Ok(Some(_)) = child.try_wait() {
                        debug!("ffmpeg exited with stderr still open");
                        break;
                    }
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                self.stop_child(&mut child, pid, suspended, ctx.grace()).await;
                remove_partial(&output);
                return EncodeOutcome::Cancelled;
            }
            status = child.wait() => status,
        };

        match status {
            Ok(status) if status.success() => {
                info!("Finished {}", output.display());
                EncodeOutcome::Success { output }
            }
            Ok(status) => {
                let detail = if tail.is_empty() {
                    "Unknown ffmpeg error".to_string()
                } else {
                    tail.joined()
                };
                let reason = match status.code() {
                    Some(code) => format!("{}ffmpeg exited with code {}: {}", prefix, code, detail),
                    None => format!("{}ffmpeg was terminated by a signal: {}", prefix, detail),
                };
                warn!("Conversion of {} failed: {}", input.display(), reason);
                EncodeOutcome::Failed { reason }
            }
            Err(e) => {
                self.stop_child(&mut child, pid, suspended, ctx.grace()).await;
                EncodeOutcome::Failed {
                    reason: format!("{}failed to run ffmpeg: {}", prefix, e),
                }
            }
        }
    }

    /// Suspend or resume the process, returns the resulting suspended state
    fn apply_pause(&self, pid: Option<u32>, suspended: bool, want: bool) -> bool {
        let Some(pid) = pid else {
            return suspended;
        };
        if want == suspended {
            return suspended;
        }
        let result = if want {
            self.control.suspend(pid)
        } else {
            self.control.resume(pid)
        };
        match result {
            Ok(()) => {
                info!("{} ffmpeg (pid {})", if want { "Suspended" } else { "Resumed" }, pid);
                want
            }
            Err(e) => {
                error!("Could not {} ffmpeg: {}", if want { "suspend" } else { "resume" }, e);
                suspended
            }
        }
    }

    /// Resume if suspended, terminate, wait `grace`, then kill
    async fn stop_child(&self, child: &mut Child, pid: Option<u32>, suspended: bool, grace: Duration) {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        if let Some(pid) = pid {
            if suspended || self.control.status(pid) == ProcessState::Suspended {
                if let Err(e) = self.control.resume(pid) {
                    warn!("Could not resume ffmpeg before stopping it: {}", e);
                }
            }
            match self.control.terminate(pid) {
                Ok(()) => {
                    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                        debug!("ffmpeg (pid {}) terminated", pid);
                        return;
                    }
                    warn!("ffmpeg (pid {}) did not terminate within {:?}, killing", pid, grace);
                }
                Err(e) => warn!("Graceful termination unavailable: {}", e),
            }
        }
        if let Err(e) = child.kill().await {
            error!("Failed to kill ffmpeg: {}", e);
        }
    }
}

fn remove_partial(output: &Path) {
    if !output.exists() {
        return;
    }
    match std::fs::remove_file(output) {
        Ok(()) => info!("Deleted partial output {}", output.display()),
        Err(e) => error!("Could not delete partial output {}: {}", output.display(), e),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::encode::process::SysinfoControl;
    use crate::policy::{profile_for, RetryLevel};
    use crate::test_support::{fake_tools, pid_file, wait_for_pid, wait_until, PROCESS_LOCK};
    use std::fs;
    use tempfile::TempDir;

    fn encoder(tools: ToolPaths) -> Encoder {
        Encoder::new(tools, Arc::new(SysinfoControl), Duration::from_millis(20))
    }

    fn ctx() -> RunContext {
        RunContext::new(Duration::from_millis(500))
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("123.456\n"), Some(123.456));
        assert_eq!(parse_duration("\n  42\n"), Some(42.0));
        assert_eq!(parse_duration("N/A\n"), None);
        assert_eq!(parse_duration("0.000000\n"), None);
        assert_eq!(parse_duration("-3\n"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[tokio::test]
    async fn test_success_reports_progress() {
        let _guard = PROCESS_LOCK.lock().await;
        let dir = TempDir::new().unwrap();
        let tools = fake_tools(dir.path());
        let input = dir.path().join("movie.mkv");
        fs::write(&input, b"source").unwrap();

        let mut samples = Vec::new();
        let outcome = encoder(tools)
            .run(&input, &profile_for(RetryLevel::Standard, false), &ctx(), |p| samples.push(p))
            .await;

        assert_eq!(outcome, EncodeOutcome::Success { output: dir.path().join("movie.mp4") });
        assert!(dir.path().join("movie.mp4").exists());
        assert!(!samples.is_empty());
        assert_eq!(samples.last().unwrap().percent, Some(100.0));
        assert!(samples.iter().all(|s| s.percent.unwrap() <= 100.0));
    }

    #[tokio::test]
    async fn test_failure_carries_tail() {
        let _guard = PROCESS_LOCK.lock().await;
        let dir = TempDir::new().unwrap();
        let tools = fake_tools(dir.path());
        let input = dir.path().join("broken.mkv");
        fs::write(&input, b"source").unwrap();

        let outcome = encoder(tools)
            .run(&input, &profile_for(RetryLevel::Tolerant, false), &ctx(), |_| {})
            .await;

        match outcome {
            EncodeOutcome::Failed { reason } => {
                assert!(reason.starts_with("(Retry Level 1) ffmpeg exited with code 2"), "{}", reason);
                assert!(reason.contains("Invalid data found when processing input"));
                assert!(!reason.contains("noise line 0"), "only the tail is kept: {}", reason);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_duration_gives_indeterminate_progress() {
        let _guard = PROCESS_LOCK.lock().await;
        let dir = TempDir::new().unwrap();
        let mut tools = fake_tools(dir.path());
        tools.ffprobe = dir.path().join("missing-ffprobe");
        let input = dir.path().join("movie.mkv");
        fs::write(&input, b"source").unwrap();

        let mut samples = Vec::new();
        let outcome = encoder(tools)
            .run(&input, &profile_for(RetryLevel::Standard, false), &ctx(), |p| samples.push(p))
            .await;

        assert!(matches!(outcome, EncodeOutcome::Success { .. }));
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.percent.is_none()));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_failure() {
        let _guard = PROCESS_LOCK.lock().await;
        let dir = TempDir::new().unwrap();
        let tools = ToolPaths {
            ffmpeg: dir.path().join("no-ffmpeg"),
            ffprobe: dir.path().join("no-ffprobe"),
        };
        let input = dir.path().join("movie.mkv");
        let outcome = encoder(tools)
            .run(&input, &profile_for(RetryLevel::Standard, false), &ctx(), |_| {})
            .await;
        match outcome {
            EncodeOutcome::Failed { reason } => assert!(reason.starts_with("failed to run ffmpeg")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite_source() {
        let dir = TempDir::new().unwrap();
        let tools = fake_tools(dir.path());
        let input = dir.path().join("already.mp4");
        let outcome = encoder(tools)
            .run(&input, &profile_for(RetryLevel::Standard, false), &ctx(), |_| {})
            .await;
        assert!(matches!(outcome, EncodeOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_cancel_removes_partial_output() {
        let _guard = PROCESS_LOCK.lock().await;
        let dir = TempDir::new().unwrap();
        let tools = fake_tools(dir.path());
        let input = dir.path().join("long.mkv");
        fs::write(&input, b"source").unwrap();
        let output = dir.path().join("long.mp4");

        let ctx = ctx();
        let canceller = ctx.clone();
        let out = output.clone();
        tokio::spawn(async move {
            wait_until(|| out.exists()).await;
            canceller.cancel();
        });

        let outcome = encoder(tools)
            .run(&input, &profile_for(RetryLevel::Standard, false), &ctx, |_| {})
            .await;

        assert_eq!(outcome, EncodeOutcome::Cancelled);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_pause_suspends_then_cancel_stops_process() {
        let _guard = PROCESS_LOCK.lock().await;
        let dir = TempDir::new().unwrap();
        let tools = fake_tools(dir.path());
        let input = dir.path().join("long.mkv");
        fs::write(&input, b"source").unwrap();
        let pid_path = pid_file(&tools);

        let ctx = ctx();
        let driver_ctx = ctx.clone();
        let enc = encoder(tools);
        let job = tokio::spawn(async move {
            enc.run(&input, &profile_for(RetryLevel::Standard, false), &driver_ctx, |_| {})
                .await
        });

        let pid = wait_for_pid(&pid_path).await;
        let ctl = SysinfoControl;

        ctx.set_paused(true);
        wait_until(|| ctl.status(pid) == ProcessState::Suspended).await;

        ctx.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(10), job)
            .await
            .expect("driver returns after cancel")
            .unwrap();

        assert_eq!(outcome, EncodeOutcome::Cancelled);
        assert_eq!(ctl.status(pid), ProcessState::Exited);
        assert!(!dir.path().join("long.mp4").exists());
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let dir = TempDir::new().unwrap();
        let tools = fake_tools(dir.path());
        let input = dir.path().join("movie.mkv");
        let ctx = ctx();
        ctx.cancel();
        let outcome = encoder(tools)
            .run(&input, &profile_for(RetryLevel::Standard, false), &ctx, |_| {})
            .await;
        assert_eq!(outcome, EncodeOutcome::Cancelled);
        assert!(!dir.path().join("movie.mp4").exists());
    }
}
