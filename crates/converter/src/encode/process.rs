//! OS process control for the running encoder
//!
//! Pausing an encode suspends the whole ffmpeg process so it stops consuming
//! CPU, rather than just ceasing to read its output. On POSIX this is
//! SIGSTOP/SIGCONT via `sysinfo`. Platforms where those signals are not
//! available report [`ControlError::Unsupported`].

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, RefreshKind, Signal, System};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("process {0} not found")]
    NotFound(u32),

    #[error("{signal} is not supported on this platform")]
    Unsupported { signal: &'static str },

    #[error("failed to deliver {signal} to process {pid}")]
    SignalFailed { pid: u32, signal: &'static str },
}

/// Coarse process state as seen by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Suspended,
    Exited,
}

/// Suspend/resume/terminate capability for a child process.
pub trait ProcessControl: Send + Sync {
    fn suspend(&self, pid: u32) -> Result<(), ControlError>;
    fn resume(&self, pid: u32) -> Result<(), ControlError>;
    /// Ask the process to exit gracefully
    fn terminate(&self, pid: u32) -> Result<(), ControlError>;
    fn status(&self, pid: u32) -> ProcessState;
    /// Whether [`ProcessControl::suspend`] can work on this platform
    fn can_suspend(&self) -> bool {
        true
    }
}

/// [`ProcessControl`] backed by `sysinfo` signals
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoControl;

impl SysinfoControl {
    fn snapshot() -> System {
        System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::new()))
    }

    fn send(&self, pid: u32, signal: Signal, name: &'static str) -> Result<(), ControlError> {
        let sys = Self::snapshot();
        let process = sys.process(Pid::from_u32(pid)).ok_or(ControlError::NotFound(pid))?;
        match process.kill_with(signal) {
            None => Err(ControlError::Unsupported { signal: name }),
            Some(true) => Ok(()),
            Some(false) => Err(ControlError::SignalFailed { pid, signal: name }),
        }
    }
}

impl ProcessControl for SysinfoControl {
    fn suspend(&self, pid: u32) -> Result<(), ControlError> {
        self.send(pid, Signal::Stop, "SIGSTOP")
    }

    fn resume(&self, pid: u32) -> Result<(), ControlError> {
        self.send(pid, Signal::Continue, "SIGCONT")
    }

    fn terminate(&self, pid: u32) -> Result<(), ControlError> {
        self.send(pid, Signal::Term, "SIGTERM")
    }

    fn status(&self, pid: u32) -> ProcessState {
        let sys = Self::snapshot();
        match sys.process(Pid::from_u32(pid)).map(|p| p.status()) {
            None | Some(ProcessStatus::Zombie) | Some(ProcessStatus::Dead) => ProcessState::Exited,
            Some(ProcessStatus::Stop) => ProcessState::Suspended,
            Some(_) => ProcessState::Running,
        }
    }

    fn can_suspend(&self) -> bool {
        sysinfo::SUPPORTED_SIGNALS.contains(&Signal::Stop)
            && sysinfo::SUPPORTED_SIGNALS.contains(&Signal::Continue)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::PROCESS_LOCK;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    fn wait_for_state(ctl: &SysinfoControl, pid: u32, want: ProcessState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if ctl.status(pid) == want {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_suspend_resume_terminate() {
        let _guard = PROCESS_LOCK.blocking_lock();
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();
        let ctl = SysinfoControl;

        ctl.suspend(pid).unwrap();
        assert!(wait_for_state(&ctl, pid, ProcessState::Suspended));

        ctl.resume(pid).unwrap();
        assert!(wait_for_state(&ctl, pid, ProcessState::Running));

        ctl.terminate(pid).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_can_suspend_on_unix() {
        assert!(SysinfoControl.can_suspend());
    }

    #[test]
    fn test_missing_process() {
        let ctl = SysinfoControl;
        // Pid far above any default pid_max
        let pid = 4_000_000_000;
        assert_eq!(ctl.suspend(pid), Err(ControlError::NotFound(pid)));
        assert_eq!(ctl.status(pid), ProcessState::Exited);
    }
}
