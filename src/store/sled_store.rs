//! Durable `HealthStore` backed by `sled`.
//!
//! Grounded on `storage::history::AnalysisStorage` / `history_storage::HistoryStorage`:
//! open-by-path, `Arc<sled::Db>` clone handle, JSON-serialized values. Unlike
//! those (keyed by timestamp, append-only), records here are keyed by
//! `file_path` directly, matching spec invariant 1.
//!
//! Each mutating operation is a read-modify-write against sled, serialized
//! by a single store-wide lock (spec §4.1: "atomic with respect to other
//! operations on the same record" — a coarse lock satisfies this without
//! needing sled's CAS primitives, since writes here are infrequent relative
//! to reads).

use super::{HealthStore, StoreError};
use crate::model::{FileHealthRecord, FileStatus};
use crate::scheduler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Sled-backed `HealthStore`. Schema is opaque per spec §6 — this is one
/// concrete choice (JSON values keyed by path), not the only legal one.
pub struct SledHealthStore {
    db: Arc<sled::Db>,
    next_id: AtomicU64,
    retry_backoff_base: Duration,
    retry_backoff_cap: Duration,
    repair_recheck_delay: Duration,
    default_max_retries: u32,
    default_max_repair_retries: u32,
    /// Serializes read-modify-write sequences against the same key.
    write_lock: Mutex<()>,
}

impl SledHealthStore {
    pub fn open<P: AsRef<Path>>(
        path: P,
        retry_backoff_base: Duration,
        retry_backoff_cap: Duration,
        repair_recheck_delay: Duration,
        default_max_retries: u32,
        default_max_repair_retries: u32,
    ) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let next_id = db
            .iter()
            .values()
            .filter_map(|v| v.ok())
            .filter_map(|v| serde_json::from_slice::<FileHealthRecord>(&v).ok())
            .map(|r| r.id)
            .max()
            .unwrap_or(0)
            + 1;
        tracing::info!(records = db.len(), "opened sled health store");
        Ok(Self {
            db: Arc::new(db),
            next_id: AtomicU64::new(next_id),
            retry_backoff_base,
            retry_backoff_cap,
            repair_recheck_delay,
            default_max_retries,
            default_max_repair_retries,
            write_lock: Mutex::new(()),
        })
    }

    fn read(&self, file_path: &str) -> Result<Option<FileHealthRecord>, StoreError> {
        match self
            .db
            .get(file_path)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => {
                let rec = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(rec))
            }
            None => Ok(None),
        }
    }

    fn write(&self, rec: &FileHealthRecord) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(rec).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.db
            .insert(rec.file_path.as_bytes(), bytes)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Load, mutate, and persist a single record, or fail if it doesn't exist.
    /// Serialized by `write_lock` against concurrent read-modify-write
    /// sequences on any key.
    async fn mutate(
        &self,
        file_path: &str,
        f: impl FnOnce(&mut FileHealthRecord) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rec = self.read(file_path)?.ok_or(StoreError::NotFound)?;
        f(&mut rec)?;
        self.write(&rec)
    }
}

#[async_trait]
impl HealthStore for SledHealthStore {
    async fn get(&self, file_path: &str) -> Result<Option<FileHealthRecord>, StoreError> {
        self.read(file_path)
    }

    async fn upsert_pending(
        &self,
        file_path: &str,
        source_ref: Option<String>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        match self.read(file_path)? {
            Some(mut rec) => {
                if rec.status != FileStatus::Pending {
                    rec.status = FileStatus::Pending;
                    rec.scheduled_check_at = Some(now);
                }
                if source_ref.is_some() {
                    rec.source_ref = source_ref;
                }
                self.write(&rec)
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let rec = FileHealthRecord::new_pending(
                    id,
                    file_path.to_string(),
                    source_ref,
                    self.default_max_retries,
                    self.default_max_repair_retries,
                    now,
                );
                self.write(&rec)
            }
        }
    }

    async fn set_checking(&self, file_path: &str) -> Result<(), StoreError> {
        self.mutate(file_path, |rec| match rec.status {
            FileStatus::Healthy | FileStatus::PermanentlyCorrupted => {
                Err(StoreError::InvalidTransition(format!(
                    "cannot set_checking from {}",
                    rec.status
                )))
            }
            _ => {
                rec.status = FileStatus::Checking;
                Ok(())
            }
        })
        .await
    }

    async fn update(
        &self,
        file_path: &str,
        status: FileStatus,
        last_error: Option<String>,
        source_ref: Option<String>,
        library_ref: Option<String>,
        scheduled_check_at: Option<DateTime<Utc>>,
        reset_counters: bool,
    ) -> Result<(), StoreError> {
        self.mutate(file_path, |rec| {
            rec.status = status;
            if last_error.is_some() {
                rec.last_error = last_error;
            }
            if source_ref.is_some() {
                rec.source_ref = source_ref;
            }
            if library_ref.is_some() {
                rec.library_ref = library_ref;
            }
            if scheduled_check_at.is_some() {
                rec.scheduled_check_at = scheduled_check_at;
            }
            if reset_counters {
                rec.retry_count = 0;
                rec.repair_retry_count = 0;
            }
            Ok(())
        })
        .await
    }

    async fn mark_healthy(
        &self,
        file_path: &str,
        next_scheduled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.mutate(file_path, |rec| {
            rec.status = FileStatus::Healthy;
            rec.retry_count = 0;
            rec.repair_retry_count = 0;
            rec.last_checked = Some(Utc::now());
            rec.scheduled_check_at = Some(next_scheduled_at);
            rec.last_error = None;
            Ok(())
        })
        .await
    }

    async fn increment_retry(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let base = self.retry_backoff_base;
        let cap = self.retry_backoff_cap;
        self.mutate(file_path, |rec| {
            let now = Utc::now();
            rec.retry_count += 1;
            rec.last_checked = Some(now);
            rec.scheduled_check_at = Some(scheduler::retry_backoff(rec.retry_count, base, cap, now));
            rec.status = FileStatus::Corrupted;
            rec.last_error = last_error;
            Ok(())
        })
        .await
    }

    async fn increment_repair_retry(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let delay = self.repair_recheck_delay;
        self.mutate(file_path, |rec| {
            let now = Utc::now();
            rec.repair_retry_count += 1;
            rec.last_checked = Some(now);
            rec.scheduled_check_at = Some(scheduler::repair_recheck_at(delay, now));
            // Forces entry into the repair phase even on a first escalation
            // whose trigger_repair call failed before ever setting
            // RepairTriggered (e.g. RepairPreconditionMissing) — otherwise
            // the record is due for neither fetch_due_for_check nor
            // fetch_due_for_repair and is orphaned. Analogous to
            // increment_retry forcing status = Corrupted.
            rec.status = FileStatus::RepairTriggered;
            rec.last_error = last_error;
            Ok(())
        })
        .await
    }

    async fn set_repair_triggered(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let delay = self.repair_recheck_delay;
        self.mutate(file_path, |rec| {
            let now = Utc::now();
            rec.status = FileStatus::RepairTriggered;
            rec.last_error = last_error;
            rec.scheduled_check_at = Some(scheduler::repair_recheck_at(delay, now));
            Ok(())
        })
        .await
    }

    async fn mark_permanently_corrupted(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        self.mutate(file_path, |rec| {
            rec.status = FileStatus::PermanentlyCorrupted;
            rec.last_error = last_error;
            Ok(())
        })
        .await
    }

    async fn fetch_due_for_check(&self, limit: usize) -> Result<Vec<FileHealthRecord>, StoreError> {
        let now = Utc::now();
        let mut due = Vec::new();
        for item in self.db.iter() {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let rec: FileHealthRecord = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if rec.is_due_for_check(now) {
                due.push(rec);
            }
        }
        due.sort_by_key(|r| r.scheduled_check_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn fetch_due_for_repair(
        &self,
        limit: usize,
    ) -> Result<Vec<FileHealthRecord>, StoreError> {
        let now = Utc::now();
        let mut due = Vec::new();
        for item in self.db.iter() {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let rec: FileHealthRecord = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if rec.is_due_for_repair(now) {
                due.push(rec);
            }
        }
        due.sort_by_key(|r| r.scheduled_check_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn reset_all_checking(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut keys_to_reset = Vec::new();
        for item in self.db.iter() {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let rec: FileHealthRecord = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if rec.status == FileStatus::Checking {
                keys_to_reset.push(key.to_vec());
            }
        }
        for key in keys_to_reset {
            if let Some(bytes) = self
                .db
                .get(&key)
                .map_err(|e| StoreError::Backend(e.to_string()))?
            {
                let mut rec: FileHealthRecord = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                rec.status = FileStatus::Pending;
                self.write(&rec)?;
            }
        }
        self.db.flush().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
