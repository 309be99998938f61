//! Core data model: the per-file health record and the probe outcome it reacts to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a tracked file, doubling as the phase discriminator the
/// `StateMachine` routes on (check-retry phase vs. repair-retry phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    /// Newly added or reset; eligible for the next health-check cycle.
    Pending,
    /// A probe is currently in flight for this file (an `ActiveCheckRegistry`
    /// entry must exist somewhere in the process while this holds).
    Checking,
    /// Last probe succeeded; counters are zero.
    Healthy,
    /// One or more consecutive probes failed; still in the check-retry phase.
    Corrupted,
    /// Escalated — a rescan has been requested and is awaited.
    RepairTriggered,
    /// Terminal. No further automatic transitions.
    PermanentlyCorrupted,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileStatus::Pending => "pending",
            FileStatus::Checking => "checking",
            FileStatus::Healthy => "healthy",
            FileStatus::Corrupted => "corrupted",
            FileStatus::RepairTriggered => "repair_triggered",
            FileStatus::PermanentlyCorrupted => "permanently_corrupted",
        };
        write!(f, "{s}")
    }
}

/// The authoritative per-file entity (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHealthRecord {
    /// Stable identifier, assigned on insert.
    pub id: u64,
    /// Canonical path inside the virtual namespace. Primary key.
    pub file_path: String,
    pub status: FileStatus,
    /// Opaque reference to the origin descriptor used to re-derive the file.
    pub source_ref: Option<String>,
    /// External library-manager path; required to trigger repair.
    pub library_ref: Option<String>,
    /// Used by the Scheduler; `created_at` substitutes when absent.
    pub release_date: Option<DateTime<Utc>>,
    /// Consecutive failing health checks since last `Healthy`.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Consecutive failing repair attempts.
    pub repair_retry_count: u32,
    pub max_repair_retries: u32,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub scheduled_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FileHealthRecord {
    /// Construct a new `Pending` record with zeroed counters, as created by
    /// `ManualApi::add_to_check`.
    pub fn new_pending(
        id: u64,
        file_path: String,
        source_ref: Option<String>,
        max_retries: u32,
        max_repair_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            file_path,
            status: FileStatus::Pending,
            source_ref,
            library_ref: None,
            release_date: None,
            retry_count: 0,
            max_retries,
            repair_retry_count: 0,
            max_repair_retries,
            last_error: None,
            last_checked: None,
            scheduled_check_at: Some(now),
            created_at: now,
        }
    }

    /// `release_date`, falling back to `created_at` when absent (spec §3).
    pub fn effective_release_date(&self) -> DateTime<Utc> {
        self.release_date.unwrap_or(self.created_at)
    }

    /// Whether this record is due for a health-check query (spec invariant 6):
    /// `scheduled_check_at <= now` and status is one the "due" query returns.
    pub fn is_due_for_check(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, FileStatus::Pending | FileStatus::Corrupted)
            && self.scheduled_check_at.is_some_and(|at| at <= now)
    }

    /// Whether this record is due for a repair-notification query (spec §4.1
    /// `fetch_due_for_repair`).
    pub fn is_due_for_repair(&self, now: DateTime<Utc>) -> bool {
        self.status == FileStatus::RepairTriggered
            && self.repair_retry_count < self.max_repair_retries
            && self.scheduled_check_at.is_some_and(|at| at <= now)
    }
}

/// Outcome of a single `Prober::probe` invocation (spec §6).
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Healthy,
    /// The file's content failed verification. `details` is an optional
    /// human-readable description, not parsed by the engine.
    Corrupted { details: Option<String> },
    /// The check could not be performed (transient I/O issue) — distinct
    /// from `Corrupted`, but routed through the same retry/escalation path.
    CheckFailed { error: String },
}

impl ProbeOutcome {
    /// A short description suitable for `last_error` / logging.
    pub fn describe(&self) -> Option<String> {
        match self {
            ProbeOutcome::Healthy => None,
            ProbeOutcome::Corrupted { details } => {
                Some(details.clone().unwrap_or_else(|| "corrupted".to_string()))
            }
            ProbeOutcome::CheckFailed { error } => Some(error.clone()),
        }
    }
}
