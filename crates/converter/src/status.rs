//! Status snapshots for the front ends
//!
//! A serializable view of the queue, the failed list and the host load,
//! printed by `mkv2mp4 status` and drawn by the TUI.

use crate::queue::JobQueue;
use crate::state::Preferences;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use sysinfo::System;

/// Host load shown next to the conversion progress
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
}

fn memory_percent(sys: &System) -> f32 {
    let total = sys.total_memory();
    if total > 0 {
        (sys.used_memory() as f64 / total as f64 * 100.0) as f32
    } else {
        0.0
    }
}

/// Collects current system metrics using sysinfo
///
/// CPU usage needs two samples, so a single call reports the load since boot
/// on some platforms. Use [`SystemSampler`] for periodic readings.
pub fn collect_system_metrics() -> SystemMetrics {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();
    SystemMetrics {
        cpu_usage_percent: sys.global_cpu_usage(),
        mem_usage_percent: memory_percent(&sys),
    }
}

/// Keeps a `System` around so successive samples measure CPU usage between calls
pub struct SystemSampler {
    sys: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self { sys }
    }

    pub fn sample(&mut self) -> SystemMetrics {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        SystemMetrics {
            cpu_usage_percent: self.sys.global_cpu_usage(),
            mem_usage_percent: memory_percent(&self.sys),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedItem {
    pub path: PathBuf,
    /// File name with its level annotation
    pub label: String,
    pub level: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedItem {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub queue: Vec<QueuedItem>,
    pub failed: Vec<FailedItem>,
    pub converting: bool,
    pub monitoring: bool,
    pub preferences: Preferences,
    pub system: SystemMetrics,
}

impl StatusSnapshot {
    pub fn new(
        queue: &JobQueue,
        preferences: &Preferences,
        converting: bool,
        monitoring: bool,
        system: SystemMetrics,
    ) -> Self {
        Self {
            queue: queue
                .pending()
                .iter()
                .map(|p| QueuedItem {
                    path: p.clone(),
                    label: queue.label_for(p),
                    level: queue.level_for(p).as_u8(),
                })
                .collect(),
            failed: queue
                .failed()
                .iter()
                .map(|e| FailedItem {
                    path: e.path.clone(),
                    reason: e.reason.clone(),
                })
                .collect(),
            converting,
            monitoring,
            preferences: preferences.clone(),
            system,
        }
    }
}
