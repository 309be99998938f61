//! `WorkerStats` — the live statistics view exposed to operators (spec §6).
//!
//! Grounded on `background::self_healer::SelfHealer`'s
//! `Arc<RwLock<SystemHealth>>` handle: a cheaply-cloned shared snapshot,
//! updated in place by the loop that owns it and read by anything holding a
//! handle, without the loop needing to know who's watching.

use crate::model::ProbeOutcome;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Coarse run state of the `Worker`'s tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// `Worker::start` has not been called, or `stop` has completed.
    Stopped,
    /// Running; no cycle currently in flight.
    Idle,
    /// A check cycle is currently executing.
    Running,
}

/// Point-in-time statistics snapshot (spec §6).
#[derive(Debug, Clone)]
pub struct WorkerStatsSnapshot {
    pub status: WorkerStatus,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub total_runs_completed: u64,
    pub total_files_checked: u64,
    pub total_files_healthy: u64,
    pub total_files_corrupted: u64,
    pub current_run_start_time: Option<DateTime<Utc>>,
    pub current_run_files_checked: u64,
    pub last_error: Option<String>,
    pub error_count: u64,
}

impl Default for WorkerStatsSnapshot {
    fn default() -> Self {
        Self {
            status: WorkerStatus::Stopped,
            last_run_time: None,
            next_run_time: None,
            total_runs_completed: 0,
            total_files_checked: 0,
            total_files_healthy: 0,
            total_files_corrupted: 0,
            current_run_start_time: None,
            current_run_files_checked: 0,
            last_error: None,
            error_count: 0,
        }
    }
}

/// Shared, mutable statistics handle. Cloning is cheap (an `Arc` clone); all
/// clones observe the same underlying state.
#[derive(Clone)]
pub struct WorkerStats {
    inner: Arc<RwLock<WorkerStatsSnapshot>>,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(WorkerStatsSnapshot::default())),
        }
    }

    pub async fn snapshot(&self) -> WorkerStatsSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn mark_stopped(&self) {
        let mut s = self.inner.write().await;
        s.status = WorkerStatus::Stopped;
        s.next_run_time = None;
    }

    pub async fn mark_idle(&self, next_run_time: Option<DateTime<Utc>>) {
        let mut s = self.inner.write().await;
        s.status = WorkerStatus::Idle;
        s.next_run_time = next_run_time;
    }

    pub async fn cycle_started(&self, now: DateTime<Utc>) {
        let mut s = self.inner.write().await;
        s.status = WorkerStatus::Running;
        s.current_run_start_time = Some(now);
        s.current_run_files_checked = 0;
    }

    pub async fn file_checked(&self, outcome: &ProbeOutcome) {
        let mut s = self.inner.write().await;
        s.total_files_checked += 1;
        s.current_run_files_checked += 1;
        match outcome {
            ProbeOutcome::Healthy => s.total_files_healthy += 1,
            ProbeOutcome::Corrupted { .. } => {
                s.total_files_corrupted += 1;
            }
            ProbeOutcome::CheckFailed { error } => {
                s.last_error = Some(error.clone());
                s.error_count += 1;
            }
        }
    }

    pub async fn check_failed(&self, error: String) {
        let mut s = self.inner.write().await;
        s.last_error = Some(error);
        s.error_count += 1;
    }

    pub async fn cycle_completed(&self, now: DateTime<Utc>) {
        let mut s = self.inner.write().await;
        s.total_runs_completed += 1;
        s.last_run_time = Some(now);
        s.current_run_start_time = None;
        s.current_run_files_checked = 0;
        s.status = WorkerStatus::Idle;
    }
}
