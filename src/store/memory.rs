//! In-memory `HealthStore` — reference implementation and the backend used
//! by the integration tests.
//!
//! Grounded on `storage::persistence::InMemoryDAL`: a single lock-guarded
//! collection, no durability, `Default`-constructible. Unlike `InMemoryDAL`
//! (a `std::sync::RwLock<Vec<_>>`), records here are keyed by path so
//! `get`/`set_checking`/etc. are O(1) and spec invariant 1 ("exactly one
//! record per `file_path`") is structural rather than asserted.

use super::{HealthStore, StoreError};
use crate::model::{FileHealthRecord, FileStatus};
use crate::scheduler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory, non-durable `HealthStore`.
pub struct InMemoryHealthStore {
    records: Mutex<HashMap<String, FileHealthRecord>>,
    next_id: AtomicU64,
    retry_backoff_base: Duration,
    retry_backoff_cap: Duration,
    repair_recheck_delay: Duration,
    default_max_retries: u32,
    default_max_repair_retries: u32,
}

impl InMemoryHealthStore {
    pub fn new(
        retry_backoff_base: Duration,
        retry_backoff_cap: Duration,
        repair_recheck_delay: Duration,
        default_max_retries: u32,
        default_max_repair_retries: u32,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            retry_backoff_base,
            retry_backoff_cap,
            repair_recheck_delay,
            default_max_retries,
            default_max_repair_retries,
        }
    }
}

impl Default for InMemoryHealthStore {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(crate::config::DEFAULT_RETRY_BACKOFF_BASE_SECONDS),
            Duration::from_secs(crate::config::DEFAULT_RETRY_BACKOFF_CAP_SECONDS),
            Duration::from_secs(crate::config::DEFAULT_REPAIR_RECHECK_DELAY_SECONDS),
            3,
            2,
        )
    }
}

#[async_trait]
impl HealthStore for InMemoryHealthStore {
    async fn get(&self, file_path: &str) -> Result<Option<FileHealthRecord>, StoreError> {
        Ok(self.records.lock().await.get(file_path).cloned())
    }

    async fn upsert_pending(
        &self,
        file_path: &str,
        source_ref: Option<String>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        match records.get_mut(file_path) {
            Some(rec) => {
                if rec.status != FileStatus::Pending {
                    rec.status = FileStatus::Pending;
                    rec.scheduled_check_at = Some(now);
                }
                if source_ref.is_some() {
                    rec.source_ref = source_ref;
                }
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
                records.insert(file_path.to_string(), rec);
            }
        }
        Ok(())
    }

    async fn set_checking(&self, file_path: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let rec = records.get_mut(file_path).ok_or(StoreError::NotFound)?;
        match rec.status {
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
        }
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
        let mut records = self.records.lock().await;
        let rec = records.get_mut(file_path).ok_or(StoreError::NotFound)?;
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
    }

    async fn mark_healthy(
        &self,
        file_path: &str,
        next_scheduled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let rec = records.get_mut(file_path).ok_or(StoreError::NotFound)?;
        rec.status = FileStatus::Healthy;
        rec.retry_count = 0;
        rec.repair_retry_count = 0;
        rec.last_checked = Some(Utc::now());
        rec.scheduled_check_at = Some(next_scheduled_at);
        rec.last_error = None;
        Ok(())
    }

    async fn increment_retry(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let rec = records.get_mut(file_path).ok_or(StoreError::NotFound)?;
        let now = Utc::now();
        rec.retry_count += 1;
        rec.last_checked = Some(now);
        rec.scheduled_check_at = Some(scheduler::retry_backoff(
            rec.retry_count,
            self.retry_backoff_base,
            self.retry_backoff_cap,
            now,
        ));
        rec.status = FileStatus::Corrupted;
        rec.last_error = last_error;
        Ok(())
    }

    async fn increment_repair_retry(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let rec = records.get_mut(file_path).ok_or(StoreError::NotFound)?;
        let now = Utc::now();
        rec.repair_retry_count += 1;
        rec.last_checked = Some(now);
        rec.scheduled_check_at = Some(scheduler::repair_recheck_at(self.repair_recheck_delay, now));
        // Forces entry into the repair phase even on a first escalation whose
        // trigger_repair call failed before ever setting RepairTriggered
        // (e.g. RepairPreconditionMissing) — otherwise the record is due for
        // neither fetch_due_for_check nor fetch_due_for_repair and is
        // orphaned. Analogous to increment_retry forcing status = Corrupted.
        rec.status = FileStatus::RepairTriggered;
        rec.last_error = last_error;
        Ok(())
    }

    async fn set_repair_triggered(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let rec = records.get_mut(file_path).ok_or(StoreError::NotFound)?;
        let now = Utc::now();
        rec.status = FileStatus::RepairTriggered;
        rec.last_error = last_error;
        rec.scheduled_check_at = Some(scheduler::repair_recheck_at(self.repair_recheck_delay, now));
        Ok(())
    }

    async fn mark_permanently_corrupted(
        &self,
        file_path: &str,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let rec = records.get_mut(file_path).ok_or(StoreError::NotFound)?;
        rec.status = FileStatus::PermanentlyCorrupted;
        rec.last_error = last_error;
        Ok(())
    }

    async fn fetch_due_for_check(&self, limit: usize) -> Result<Vec<FileHealthRecord>, StoreError> {
        let records = self.records.lock().await;
        let now = Utc::now();
        let mut due: Vec<FileHealthRecord> = records
            .values()
            .filter(|r| r.is_due_for_check(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_check_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn fetch_due_for_repair(
        &self,
        limit: usize,
    ) -> Result<Vec<FileHealthRecord>, StoreError> {
        let records = self.records.lock().await;
        let now = Utc::now();
        let mut due: Vec<FileHealthRecord> = records
            .values()
            .filter(|r| r.is_due_for_repair(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_check_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn reset_all_checking(&self) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        for rec in records.values_mut() {
            if rec.status == FileStatus::Checking {
                rec.status = FileStatus::Pending;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryHealthStore {
        InMemoryHealthStore::default()
    }

    #[tokio::test]
    async fn upsert_pending_is_idempotent_and_preserves_counters() {
        let store = store();
        store.upsert_pending("/m/x.mkv", Some("src".into())).await.unwrap();
        store.increment_retry("/m/x.mkv", Some("boom".into())).await.unwrap();

        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        let rec = store.get("/m/x.mkv").await.unwrap().unwrap();
        assert_eq!(rec.status, FileStatus::Pending);
        assert_eq!(rec.retry_count, 1, "counters must not reset on re-upsert");
    }

    #[tokio::test]
    async fn set_checking_rejects_healthy_and_permanently_corrupted() {
        let store = store();
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store
            .mark_healthy("/m/x.mkv", Utc::now())
            .await
            .unwrap();
        assert!(store.set_checking("/m/x.mkv").await.is_err());

        store.upsert_pending("/m/y.mkv", None).await.unwrap();
        store
            .mark_permanently_corrupted("/m/y.mkv", Some("dead".into()))
            .await
            .unwrap();
        assert!(store.set_checking("/m/y.mkv").await.is_err());
    }

    #[tokio::test]
    async fn reset_all_checking_restores_pending() {
        let store = store();
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store.set_checking("/m/x.mkv").await.unwrap();
        store.upsert_pending("/m/y.mkv", None).await.unwrap();

        store.reset_all_checking().await.unwrap();

        assert_eq!(
            store.get("/m/x.mkv").await.unwrap().unwrap().status,
            FileStatus::Pending
        );
        assert_eq!(
            store.get("/m/y.mkv").await.unwrap().unwrap().status,
            FileStatus::Pending
        );
    }

    #[tokio::test]
    async fn reset_all_checking_on_clean_store_is_noop() {
        let store = store();
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store.reset_all_checking().await.unwrap();
        assert_eq!(
            store.get("/m/x.mkv").await.unwrap().unwrap().status,
            FileStatus::Pending
        );
    }

    #[tokio::test]
    async fn fetch_due_for_check_excludes_healthy_and_future_schedule() {
        let store = store();
        store.upsert_pending("/m/a.mkv", None).await.unwrap();
        store.upsert_pending("/m/b.mkv", None).await.unwrap();
        store.mark_healthy("/m/b.mkv", Utc::now()).await.unwrap();

        let due = store.fetch_due_for_check(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].file_path, "/m/a.mkv");
    }

    #[tokio::test]
    async fn fetch_due_for_check_respects_limit() {
        let store = store();
        for i in 0..5 {
            store.upsert_pending(&format!("/m/{i}.mkv"), None).await.unwrap();
        }
        let due = store.fetch_due_for_check(2).await.unwrap();
        assert_eq!(due.len(), 2);
    }
}
