//! Job queue
//!
//! Ordered list of pending source paths, the failed list, and the two
//! escalation marker sets. A path is either pending or failed, never both,
//! and carries at most one escalation marker.

use crate::policy::RetryLevel;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A conversion attempt that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Pending queue, failed list and escalation markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQueue {
    pending: Vec<PathBuf>,
    failed: Vec<FailedEntry>,
    level1: HashSet<PathBuf>,
    level2: HashSet<PathBuf>,
}

/// Queue state shared between the UI, the batch task and the folder monitor
pub type SharedQueue = Arc<RwLock<JobQueue>>;

pub fn new_shared_queue(queue: JobQueue) -> SharedQueue {
    Arc::new(RwLock::new(queue))
}

/// Display label for a path: basename plus the level annotation
pub fn display_label(path: &Path, level: RetryLevel) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    format!("{}{}", name, level.label_suffix())
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    pub fn failed(&self) -> &[FailedEntry] {
        &self.failed
    }

    pub fn level1(&self) -> &HashSet<PathBuf> {
        &self.level1
    }

    pub fn level2(&self) -> &HashSet<PathBuf> {
        &self.level2
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.iter().any(|p| p == path)
    }

    pub fn is_failed(&self, path: &Path) -> bool {
        self.failed.iter().any(|e| e.path == path)
    }

    /// Add a path to the end of the queue
    ///
    /// Returns false (and changes nothing) when the path is already pending
    /// or sits in the failed list.
    pub fn enqueue(&mut self, path: PathBuf) -> bool {
        if self.is_pending(&path) || self.is_failed(&path) {
            return false;
        }
        self.pending.push(path);
        true
    }

    /// Remove a pending path, returns whether it was present
    pub fn remove(&mut self, path: &Path) -> bool {
        match self.pending.iter().position(|p| p == path) {
            Some(idx) => {
                self.remove_at(idx);
                true
            }
            None => false,
        }
    }

    /// Remove the pending path at `index`
    pub fn remove_at(&mut self, index: usize) -> Option<PathBuf> {
        if index >= self.pending.len() {
            return None;
        }
        let path = self.pending.remove(index);
        self.clear_marker(&path);
        Some(path)
    }

    /// Drop every pending path together with its marker
    pub fn clear(&mut self) {
        for path in std::mem::take(&mut self.pending) {
            self.clear_marker(&path);
        }
    }

    /// Move a failed path back into the queue at the given level
    ///
    /// The failed entry is removed, any previous marker is cleared and the
    /// new one set. A path that is already pending is not appended twice but
    /// still gets its marker updated. A path that is neither failed nor pending
    /// is left alone. Returns true if the path was appended.
    pub fn requeue_from_failed(&mut self, path: &Path, level: RetryLevel) -> bool {
        if !self.is_failed(path) && !self.is_pending(path) {
            return false;
        }
        self.failed.retain(|e| e.path != path);
        self.clear_marker(path);
        match level {
            RetryLevel::Standard => {}
            RetryLevel::Tolerant => {
                self.level1.insert(path.to_path_buf());
            }
            RetryLevel::Salvage => {
                self.level2.insert(path.to_path_buf());
            }
        }
        if self.is_pending(path) {
            return false;
        }
        self.pending.push(path.to_path_buf());
        true
    }

    /// Requeue every failed path at `level`, returns how many were appended
    pub fn requeue_all_failed(&mut self, level: RetryLevel) -> usize {
        let paths: Vec<PathBuf> = self.failed.iter().map(|e| e.path.clone()).collect();
        paths
            .iter()
            .filter(|p| self.requeue_from_failed(p, level))
            .count()
    }

    pub fn clear_failed(&mut self) {
        self.failed.clear();
    }

    /// Record a failed attempt
    ///
    /// The path leaves the pending queue and its marker is dropped. A path that
    /// already has a failed entry gets its reason replaced.
    pub fn push_failed(&mut self, path: PathBuf, reason: String) {
        self.pending.retain(|p| p != &path);
        self.clear_marker(&path);
        if let Some(entry) = self.failed.iter_mut().find(|e| e.path == path) {
            entry.reason = reason;
            return;
        }
        self.failed.push(FailedEntry { path, reason });
    }

    /// Finish a successful attempt: drop from pending and clear the marker
    pub fn complete(&mut self, path: &Path) {
        self.pending.retain(|p| p != path);
        self.clear_marker(path);
    }

    /// Level the next attempt on `path` should run at
    pub fn level_for(&self, path: &Path) -> RetryLevel {
        if self.level2.contains(path) {
            RetryLevel::Salvage
        } else if self.level1.contains(path) {
            RetryLevel::Tolerant
        } else {
            RetryLevel::Standard
        }
    }

    pub fn clear_marker(&mut self, path: &Path) {
        self.level1.remove(path);
        self.level2.remove(path);
    }

    /// Label shown for a pending path, derived from the marker sets
    pub fn label_for(&self, path: &Path) -> String {
        display_label(path, self.level_for(path))
    }

    /// Labels for the whole pending queue in order
    pub fn labels(&self) -> Vec<String> {
        self.pending.iter().map(|p| self.label_for(p)).collect()
    }

    /// Rebuild a queue from raw persisted parts, re-establishing invariants
    ///
    /// Pending paths are deduplicated (first occurrence wins), failed entries
    /// whose path is pending are dropped, markers for paths that are not
    /// pending are dropped and a path marked at both levels keeps level 2.
    pub fn from_parts(
        pending: Vec<PathBuf>,
        failed: Vec<(PathBuf, String)>,
        level1: Vec<PathBuf>,
        level2: Vec<PathBuf>,
    ) -> Self {
        let mut queue = JobQueue::new();
        for path in pending {
            if !queue.is_pending(&path) {
                queue.pending.push(path);
            }
        }
        for (path, reason) in failed {
            if queue.is_pending(&path) || queue.is_failed(&path) {
                continue;
            }
            queue.failed.push(FailedEntry { path, reason });
        }
        for path in level2 {
            if queue.is_pending(&path) {
                queue.level2.insert(path);
            }
        }
        for path in level1 {
            if queue.is_pending(&path) && !queue.level2.contains(&path) {
                queue.level1.insert(path);
            }
        }
        queue
    }
}
