//! `HealthStore` — the persistence contract (spec §4.1).
//!
//! Pluggable backend trait. Backend-specific failures are reported through
//! `StoreError`, here, and folded into the engine-facing error at the call
//! boundary (`crate::error::HealthError::StoreError`) rather than leaking
//! backend details into the rest of the engine.

pub mod memory;
pub mod sled_store;

pub use memory::InMemoryHealthStore;
pub use sled_store::SledHealthStore;

use crate::model::{FileHealthRecord, FileStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Errors raised by a `HealthStore` backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no record for path")]
    NotFound,
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Persistent record store. Each operation is atomic with respect to other
/// operations on the same record (spec §4.1 concurrency note); readers
/// (`get`, `fetch_due_*`) may run concurrently with one writer per record.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn get(&self, file_path: &str) -> Result<Option<FileHealthRecord>, StoreError>;

    /// Insert if absent; else, if `status != Pending`, transition to
    /// `Pending` without resetting counters.
    async fn upsert_pending(
        &self,
        file_path: &str,
        source_ref: Option<String>,
    ) -> Result<(), StoreError>;

    /// `Pending | Corrupted -> Checking`; fails if current status is one of
    /// `{Healthy, PermanentlyCorrupted}`.
    async fn set_checking(&self, file_path: &str) -> Result<(), StoreError>;

    /// The general write path. `library_ref` is set when `Some` — this is
    /// also the only way a record acquires the library-manager reference
    /// `state_machine::trigger_repair` requires (library ingestion, outside
    /// this crate's scope, is expected to call this once it knows the path).
    #[allow(clippy::too_many_arguments)]
    async fn update(
        &self,
        file_path: &str,
        status: FileStatus,
        last_error: Option<String>,
        source_ref: Option<String>,
        library_ref: Option<String>,
        scheduled_check_at: Option<DateTime<Utc>>,
        reset_counters: bool,
    ) -> Result<(), StoreError>;

    /// `status = Healthy`, both retry counters to zero, `last_checked = now`.
    async fn mark_healthy(
        &self,
        file_path: &str,
        next_scheduled_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// `retry_count += 1`, `last_checked = now`,
    /// `scheduled_check_at = now + backoff(retry_count)`. Status stays
    /// `Corrupted`.
    async fn increment_retry(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Analogous to `increment_retry`, on `repair_retry_count`.
    async fn increment_repair_retry(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Transitions to `RepairTriggered`,
    /// `scheduled_check_at = now + repair_recheck_delay`.
    async fn set_repair_triggered(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Terminal transition.
    async fn mark_permanently_corrupted(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Records whose `scheduled_check_at <= now` and status in
    /// `{Pending, Corrupted}`, ordered by `scheduled_check_at` ascending,
    /// bounded to `limit`.
    async fn fetch_due_for_check(&self, limit: usize) -> Result<Vec<FileHealthRecord>, StoreError>;

    /// Records with `status = RepairTriggered` where
    /// `repair_retry_count < max_repair_retries` and `scheduled_check_at <= now`.
    async fn fetch_due_for_repair(
        &self,
        limit: usize,
    ) -> Result<Vec<FileHealthRecord>, StoreError>;

    /// Startup reconciliation: `Checking -> Pending` for every record
    /// (spec invariant 3).
    async fn reset_all_checking(&self) -> Result<(), StoreError>;
}
