//! mkv2mp4 batch converter
//!
//! Converts a queue of video files to H.264/AAC MP4 by driving ffmpeg, one
//! file at a time. Failed files can be retried with progressively more
//! tolerant encoder settings; a folder monitor can feed the queue.

pub mod batch;
pub mod control;
pub mod encode;
pub mod events;
pub mod logging;
pub mod monitor;
pub mod policy;
pub mod queue;
pub mod scan;
pub mod session;
pub mod startup;
pub mod state;
pub mod status;
pub mod verify;

#[cfg(all(test, unix))]
mod test_support;

pub use mkv2mp4_config as config;
pub use mkv2mp4_config::Config;
pub use batch::{BatchError, BatchHandle, BatchSettings, Orchestrator};
pub use control::RunContext;
pub use encode::{EncodeOutcome, Encoder, Progress};
pub use events::{channel, BatchSummary, Event, EventSink, JobResult, MonitorStatus, WaitReason};
pub use monitor::{FolderMonitor, MonitorHandle, MonitorOptions};
pub use policy::{output_path_for, profile_for, EncoderProfile, RetryLevel, VideoCodec};
pub use queue::{display_label, FailedEntry, JobQueue, SharedQueue};
pub use scan::{scan_directory, ScanError};
pub use session::{EnqueueReport, Session, SessionError};
pub use startup::{check_tools, resolve_tools, ToolError, ToolPaths};
pub use state::{PersistedState, Preferences};
pub use status::{collect_system_metrics, StatusSnapshot, SystemMetrics, SystemSampler};
pub use verify::{verify_output, Verification};
