//! `ManualApi` — the operator-facing surface for on-demand, single-file
//! operations (spec §4.6).
//!
//! Sits beside the cycle-driven [`crate::worker::Worker`] and shares its
//! [`crate::registry::ActiveCheckRegistry`] and [`crate::store::HealthStore`],
//! so a manual check and a cycle-driven check can never both be in flight for
//! the same path. Detached-task spawn style grounded on
//! `acquisition::scanner::scan_subnet`'s `tokio::spawn` fan-out — here there
//! is no request/response at all, only fire-and-forget plus observable state
//! via `stats`/`is_check_active`.

use crate::config::MANUAL_CHECK_DEADLINE;
use crate::error::HealthError;
use crate::model::{FileStatus, ProbeOutcome};
use crate::orchestrator::CheckOrchestrator;
use crate::registry::ActiveCheckRegistry;
use crate::stats::{WorkerStats, WorkerStatsSnapshot, WorkerStatus};
use crate::store::HealthStore;
use crate::worker::Worker;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct ManualApi {
    store: Arc<dyn HealthStore>,
    orchestrator: Arc<CheckOrchestrator>,
    registry: Arc<ActiveCheckRegistry>,
    worker: Arc<Worker>,
    stats: WorkerStats,
}

impl ManualApi {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            store: worker.store(),
            orchestrator: worker.orchestrator(),
            registry: worker.registry(),
            stats: worker.stats_handle(),
            worker,
        }
    }

    /// Add (or reset) a file for the next health-check cycle to pick up.
    pub async fn add_to_check(
        &self,
        file_path: &str,
        source_ref: Option<String>,
    ) -> Result<(), HealthError> {
        self.store
            .upsert_pending(file_path, source_ref)
            .await
            .map_err(Into::into)
    }

    /// Run a single file's check immediately, outside the regular cycle.
    ///
    /// Rejects with [`HealthError::NotRunning`] if the worker is stopped.
    /// Otherwise spawns a detached task bounded to
    /// [`MANUAL_CHECK_DEADLINE`] and returns without waiting for it.
    ///
    /// On task-level failure the record is reset to `Pending` so the next
    /// cycle retries it (spec §4.6), except when the deadline itself fires:
    /// that case is distinguished from an operator-initiated
    /// `cancel_active_check` (which shares this same cancellation handle)
    /// and is instead fed to the `StateMachine` as a `CheckFailed` outcome,
    /// per spec §7's "Timeout ... treated as CheckFailed by StateMachine".
    pub async fn perform_background_check(&self, file_path: &str) -> Result<(), HealthError> {
        if !self.worker.is_running().await {
            return Err(HealthError::NotRunning);
        }

        let cancel = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline_cancel = cancel.clone();
        let deadline_flag = timed_out.clone();
        tokio::spawn(async move {
            tokio::time::sleep(MANUAL_CHECK_DEADLINE).await;
            deadline_flag.store(true, Ordering::SeqCst);
            deadline_cancel.cancel();
        });

        let orchestrator = self.orchestrator.clone();
        let state_machine = self.worker.state_machine();
        let store = self.store.clone();
        let stats = self.stats.clone();
        let path = file_path.to_string();
        tokio::spawn(async move {
            match orchestrator.run(&path, cancel).await {
                Ok(outcome) => stats.file_checked(&outcome).await,
                Err(HealthError::Cancelled) if timed_out.load(Ordering::SeqCst) => {
                    // The deadline fired, not an operator cancel (both share
                    // this cancellation handle, hence the `timed_out` flag to
                    // tell them apart). Surfaced to the caller as the
                    // dedicated `Timeout` kind; per spec §7 it is then fed to
                    // the StateMachine as a plain `CheckFailed` outcome.
                    let timeout_err = HealthError::Timeout;
                    warn!(file_path = %path, error = %timeout_err, "manual check exceeded its deadline");
                    if let Ok(Some(record)) = store.get(&path).await {
                        let outcome = ProbeOutcome::CheckFailed {
                            error: "manual check timed out".to_string(),
                        };
                        if let Err(e) = state_machine.apply(&record, outcome).await {
                            warn!(file_path = %path, error = %e, "failed to apply timeout outcome");
                        }
                    }
                    stats.check_failed(timeout_err.to_string()).await;
                }
                Err(HealthError::Cancelled) => {
                    debug!(file_path = %path, "manual check cancelled by operator");
                }
                Err(HealthError::AlreadyActive) => {
                    debug!(file_path = %path, "manual check skipped, a check is already active");
                }
                Err(e) => {
                    warn!(file_path = %path, error = %e, "manual check failed, resetting to pending");
                    stats.check_failed(e.to_string()).await;
                    if let Err(store_err) = store
                        .update(
                            &path,
                            FileStatus::Pending,
                            Some(e.to_string()),
                            None,
                            None,
                            Some(Utc::now()),
                            false,
                        )
                        .await
                    {
                        warn!(file_path = %path, error = %store_err, "failed to reset to pending after manual check failure");
                    }
                }
            }
        });

        Ok(())
    }

    /// Cancel whichever check (manual or cycle-driven) is currently active
    /// for `file_path`. Fails with [`HealthError::NoActiveCheck`] if none is.
    ///
    /// On success, resets the record to `Pending` with its counters
    /// untouched so it simply retries on the next cycle (spec §4.6, S4).
    pub async fn cancel_active_check(&self, file_path: &str) -> Result<(), HealthError> {
        self.registry.cancel(file_path).await?;
        self.store
            .update(
                file_path,
                FileStatus::Pending,
                None,
                None,
                None,
                Some(Utc::now()),
                false,
            )
            .await?;
        Ok(())
    }

    pub async fn is_check_active(&self, file_path: &str) -> bool {
        self.registry.is_active(file_path).await
    }

    /// Whether a cycle is currently executing (distinct from whether the
    /// worker is started at all — see [`Worker::is_running`]).
    pub async fn is_cycle_running(&self) -> bool {
        self.stats.snapshot().await.status == WorkerStatus::Running
    }

    pub async fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::contracts::{Notifier, Prober, Rescanner};
    use crate::model::{FileStatus, ProbeOutcome};
    use crate::store::InMemoryHealthStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct AlwaysHealthy;
    #[async_trait]
    impl Prober for AlwaysHealthy {
        async fn probe(&self, _file_path: &str, _cancel: CancellationToken) -> ProbeOutcome {
            ProbeOutcome::Healthy
        }
    }
    struct NoopRescanner;
    #[async_trait]
    impl Rescanner for NoopRescanner {
        async fn rescan(&self, _library_ref: &str) -> Result<(), String> {
            Ok(())
        }
    }
    struct NoopNotifier;
    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn notify(&self, _file_path: &str, _outcome: &ProbeOutcome) {}
    }

    fn make_api() -> (Arc<InMemoryHealthStore>, ManualApi, Arc<Worker>) {
        let store = Arc::new(InMemoryHealthStore::default());
        let worker = Arc::new(Worker::new(
            store.clone(),
            Arc::new(AlwaysHealthy),
            Arc::new(NoopRescanner),
            Arc::new(NoopNotifier),
            EngineConfig {
                check_interval: Duration::from_secs(3600),
                ..EngineConfig::default()
            },
        ));
        let api = ManualApi::new(worker.clone());
        (store, api, worker)
    }

    #[tokio::test]
    async fn perform_background_check_rejects_when_worker_stopped() {
        let (_store, api, _worker) = make_api();
        let err = api.perform_background_check("/m/x.mkv").await.unwrap_err();
        assert!(matches!(err, HealthError::NotRunning));
    }

    #[tokio::test]
    async fn perform_background_check_runs_and_marks_healthy() {
        let (store, api, worker) = make_api();
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        worker.start(CancellationToken::new()).await.unwrap();

        api.perform_background_check("/m/x.mkv").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rec = store.get("/m/x.mkv").await.unwrap().unwrap();
        assert_eq!(rec.status, FileStatus::Healthy);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_with_no_active_check_fails() {
        let (_store, api, _worker) = make_api();
        let err = api.cancel_active_check("/m/x.mkv").await.unwrap_err();
        assert!(matches!(err, HealthError::NoActiveCheck));
    }

    struct BlockingProber;
    #[async_trait]
    impl Prober for BlockingProber {
        async fn probe(&self, _file_path: &str, cancel: CancellationToken) -> ProbeOutcome {
            cancel.cancelled().await;
            ProbeOutcome::Healthy
        }
    }

    #[tokio::test]
    async fn cancel_active_check_resets_to_pending_preserving_counters() {
        let store = Arc::new(InMemoryHealthStore::default());
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store.increment_retry("/m/x.mkv", Some("prior failure".into())).await.unwrap();
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store.set_checking("/m/x.mkv").await.unwrap();

        let worker = Arc::new(Worker::new(
            store.clone(),
            Arc::new(BlockingProber),
            Arc::new(NoopRescanner),
            Arc::new(NoopNotifier),
            EngineConfig {
                check_interval: Duration::from_secs(3600),
                ..EngineConfig::default()
            },
        ));
        let api = ManualApi::new(worker.clone());
        worker.start(CancellationToken::new()).await.unwrap();

        api.perform_background_check("/m/x.mkv").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(api.is_check_active("/m/x.mkv").await);

        api.cancel_active_check("/m/x.mkv").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rec = store.get("/m/x.mkv").await.unwrap().unwrap();
        assert_eq!(rec.status, FileStatus::Pending);
        assert_eq!(rec.retry_count, 1, "counters survive an operator cancel");
        worker.stop().await.unwrap();
    }
}
