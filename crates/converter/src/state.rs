//! State persistence
//!
//! The pending queue, failed list, escalation markers and user preferences
//! are saved as pretty-printed JSON on shutdown and restored at startup.
//! Loading never fails: a missing or corrupt file yields an empty state.

use crate::queue::JobQueue;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Default folder scan interval
pub const DEFAULT_SCAN_INTERVAL_MINUTES: u64 = 10;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// User preferences persisted alongside the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    /// Folder watched by the monitor
    #[serde(alias = "plex_media_directory")]
    pub watch_directory: Option<PathBuf>,
    /// Delete the source once its output passed verification
    pub auto_delete_verified_originals: bool,
    #[serde(
        alias = "plex_scan_interval_minutes",
        deserialize_with = "minutes_from_number_or_text"
    )]
    pub scan_interval_minutes: u64,
    /// Start a batch when a scan adds files
    #[serde(alias = "auto_start_plex_conversions")]
    pub auto_start_on_scan: bool,
    /// Use h264_nvenc instead of libx264
    #[serde(alias = "use_gpu_acceleration")]
    pub use_hardware_acceleration: bool,
}

/// Older state files store the interval as the text of an entry field
fn minutes_from_number_or_text<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Minutes {
        Number(u64),
        Text(String),
    }

    Ok(match Minutes::deserialize(deserializer)? {
        Minutes::Number(n) => n,
        Minutes::Text(text) => text
            .trim()
            .parse()
            .unwrap_or(DEFAULT_SCAN_INTERVAL_MINUTES),
    })
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            watch_directory: None,
            auto_delete_verified_originals: false,
            scan_interval_minutes: DEFAULT_SCAN_INTERVAL_MINUTES,
            auto_start_on_scan: false,
            use_hardware_acceleration: false,
        }
    }
}

/// On-disk layout of the state file
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SnapshotFile {
    file_queue: Vec<PathBuf>,
    #[serde(alias = "failed_files_data")]
    failed_files: Vec<(PathBuf, String)>,
    #[serde(alias = "files_for_retry_level_1")]
    retry_level_1: Vec<PathBuf>,
    #[serde(alias = "files_for_retry_level_2")]
    retry_level_2: Vec<PathBuf>,
    #[serde(flatten)]
    preferences: Preferences,
}

/// Preferences shared between the UI and the folder monitor
pub type SharedPreferences = Arc<RwLock<Preferences>>;

/// Everything restored at startup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub queue: JobQueue,
    pub preferences: Preferences,
}

fn sorted(set: &std::collections::HashSet<PathBuf>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = set.iter().cloned().collect();
    paths.sort();
    paths
}

/// Serialize the queue and preferences to JSON text
pub fn to_json(queue: &JobQueue, preferences: &Preferences) -> Result<String, StateError> {
    let file = SnapshotFile {
        file_queue: queue.pending().to_vec(),
        failed_files: queue
            .failed()
            .iter()
            .map(|e| (e.path.clone(), e.reason.clone()))
            .collect(),
        retry_level_1: sorted(queue.level1()),
        retry_level_2: sorted(queue.level2()),
        preferences: preferences.clone(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Parse JSON text and re-establish the queue invariants
pub fn from_json(content: &str) -> Result<PersistedState, StateError> {
    let file: SnapshotFile = serde_json::from_str(content)?;
    let queue = JobQueue::from_parts(
        file.file_queue,
        file.failed_files,
        file.retry_level_1,
        file.retry_level_2,
    );
    let mut preferences = file.preferences;
    if let Some(dir) = &preferences.watch_directory {
        if !dir.is_dir() {
            warn!(
                "Saved watch directory {} no longer exists, clearing it",
                dir.display()
            );
            preferences.watch_directory = None;
        }
    }
    if preferences.scan_interval_minutes == 0 {
        preferences.scan_interval_minutes = DEFAULT_SCAN_INTERVAL_MINUTES;
    }
    Ok(PersistedState { queue, preferences })
}

/// Write the state file via a temp file and rename
pub fn save(path: &Path, queue: &JobQueue, preferences: &Preferences) -> Result<(), StateError> {
    let json = to_json(queue, preferences)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// [`save`], logging instead of returning failures
pub fn save_or_log(path: &Path, queue: &JobQueue, preferences: &Preferences) -> bool {
    match save(path, queue, preferences) {
        Ok(()) => {
            info!(
                "Saved state to {} ({} queued, {} failed)",
                path.display(),
                queue.len(),
                queue.failed().len()
            );
            true
        }
        Err(e) => {
            error!("Could not save state to {}: {}", path.display(), e);
            false
        }
    }
}

/// Read the state file, degrading to an empty state on any problem
pub fn load(path: &Path) -> PersistedState {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No saved state at {}, starting empty", path.display());
            return PersistedState::default();
        }
        Err(e) => {
            error!("Could not read state file {}: {}", path.display(), e);
            return PersistedState::default();
        }
    };

    match from_json(&content) {
        Ok(state) => {
            info!(
                "Loaded state from {} ({} queued, {} failed)",
                path.display(),
                state.queue.len(),
                state.queue.failed().len()
            );
            state
        }
        Err(e) => {
            error!("Ignoring corrupt state file {}: {}", path.display(), e);
            PersistedState::default()
        }
    }
}
