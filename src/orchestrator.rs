//! `CheckOrchestrator` — runs a single file through a probe and applies the
//! result (spec §4.3).
//!
//! Grounded on `pipeline::processing_loop::ProcessingLoop`'s
//! `tokio::select!`-over-`CancellationToken` shape, narrowed to a single
//! linear check-then-cancel-then-apply sequence instead of a `select!` loop,
//! since there is exactly one cancellation point to observe rather than a
//! stream of events.

use crate::contracts::{Notifier, Prober};
use crate::error::HealthError;
use crate::model::ProbeOutcome;
use crate::registry::ActiveCheckRegistry;
use crate::state_machine::StateMachine;
use crate::store::HealthStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct CheckOrchestrator {
    store: Arc<dyn HealthStore>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    state_machine: Arc<StateMachine>,
    registry: Arc<ActiveCheckRegistry>,
}

impl CheckOrchestrator {
    pub fn new(
        store: Arc<dyn HealthStore>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        state_machine: Arc<StateMachine>,
        registry: Arc<ActiveCheckRegistry>,
    ) -> Self {
        Self {
            store,
            prober,
            notifier,
            state_machine,
            registry,
        }
    }

    /// Run one check against `file_path`, bounded by `outer_cancel`.
    ///
    /// Fails with [`HealthError::AlreadyActive`] if a check is already in
    /// flight for this path. On cancellation (before or during the probe)
    /// no store state is touched; the record is left exactly as the probe
    /// found it.
    pub async fn run(
        &self,
        file_path: &str,
        outer_cancel: CancellationToken,
    ) -> Result<ProbeOutcome, HealthError> {
        let child = self.registry.register(file_path, &outer_cancel).await?;

        let result = self.run_inner(file_path, &child).await;
        self.registry.deregister(file_path).await;
        result
    }

    async fn run_inner(
        &self,
        file_path: &str,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, HealthError> {
        if cancel.is_cancelled() {
            debug!(file_path, "check cancelled before probe started");
            return Err(HealthError::Cancelled);
        }

        let outcome = self.prober.probe(file_path, cancel.clone()).await;

        if cancel.is_cancelled() {
            debug!(file_path, "check cancelled during probe, discarding outcome");
            return Err(HealthError::Cancelled);
        }

        let record = self
            .store
            .get(file_path)
            .await?
            .ok_or_else(|| HealthError::StoreError("record disappeared during check".to_string()))?;

        self.state_machine.apply(&record, outcome.clone()).await?;
        self.notifier.notify(file_path, &outcome).await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileStatus, ProbeOutcome};
    use crate::store::InMemoryHealthStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedProber {
        outcome: ProbeOutcome,
        cancel_before_returning: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, _file_path: &str, cancel: CancellationToken) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_before_returning {
                cancel.cancel();
            }
            self.outcome.clone()
        }
    }

    struct NoopRescanner;
    #[async_trait]
    impl crate::contracts::Rescanner for NoopRescanner {
        async fn rescan(&self, _library_ref: &str) -> Result<(), String> {
            Ok(())
        }
    }

    struct CountingNotifier {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _file_path: &str, _outcome: &ProbeOutcome) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn harness(
        outcome: ProbeOutcome,
        cancel_before_returning: bool,
    ) -> (CheckOrchestrator, Arc<InMemoryHealthStore>, Arc<CountingNotifier>) {
        let store = Arc::new(InMemoryHealthStore::new(
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            3,
            2,
        ));
        let prober = Arc::new(FixedProber {
            outcome,
            cancel_before_returning,
            calls: AtomicUsize::new(0),
        });
        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
        });
        let state_machine = Arc::new(StateMachine::new(store.clone(), Arc::new(NoopRescanner)));
        let registry = Arc::new(ActiveCheckRegistry::new());
        let orchestrator = CheckOrchestrator::new(
            store.clone(),
            prober,
            notifier.clone(),
            state_machine,
            registry,
        );
        (orchestrator, store, notifier)
    }

    #[tokio::test]
    async fn healthy_outcome_marks_record_healthy_and_notifies() {
        let (orchestrator, store, notifier) = harness(ProbeOutcome::Healthy, false);
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store.set_checking("/m/x.mkv").await.unwrap();

        orchestrator
            .run("/m/x.mkv", CancellationToken::new())
            .await
            .unwrap();

        let rec = store.get("/m/x.mkv").await.unwrap().unwrap();
        assert_eq!(rec.status, FileStatus::Healthy);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_active_rejects_concurrent_run() {
        let (orchestrator, store, _notifier) = harness(ProbeOutcome::Healthy, false);
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        let parent = CancellationToken::new();
        let _held = orchestrator
            .registry
            .register("/m/x.mkv", &parent)
            .await
            .unwrap();

        let err = orchestrator.run("/m/x.mkv", parent).await.unwrap_err();
        assert!(matches!(err, HealthError::AlreadyActive));
    }

    #[tokio::test]
    async fn cancellation_before_probe_leaves_record_untouched() {
        let (orchestrator, store, notifier) = harness(ProbeOutcome::Healthy, false);
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store.set_checking("/m/x.mkv").await.unwrap();
        let parent = CancellationToken::new();
        parent.cancel();

        let err = orchestrator.run("/m/x.mkv", parent).await.unwrap_err();
        assert!(matches!(err, HealthError::Cancelled));
        assert_eq!(
            store.get("/m/x.mkv").await.unwrap().unwrap().status,
            FileStatus::Checking
        );
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_probe_discards_outcome() {
        let (orchestrator, store, notifier) = harness(ProbeOutcome::Healthy, true);
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store.set_checking("/m/x.mkv").await.unwrap();

        let err = orchestrator
            .run("/m/x.mkv", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::Cancelled));
        assert_eq!(
            store.get("/m/x.mkv").await.unwrap().unwrap().status,
            FileStatus::Checking
        );
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupted_outcome_increments_retry() {
        let (orchestrator, store, _notifier) = harness(
            ProbeOutcome::Corrupted {
                details: Some("bad crc".to_string()),
            },
            false,
        );
        store.upsert_pending("/m/x.mkv", None).await.unwrap();
        store.set_checking("/m/x.mkv").await.unwrap();

        orchestrator
            .run("/m/x.mkv", CancellationToken::new())
            .await
            .unwrap();

        let rec = store.get("/m/x.mkv").await.unwrap().unwrap();
        assert_eq!(rec.status, FileStatus::Corrupted);
        assert_eq!(rec.retry_count, 1);
    }
}
