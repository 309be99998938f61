//! `Worker` — the tick loop that drives health-check and repair cycles
//! (spec §4.5).
//!
//! Grounded on `background::self_healer::SelfHealer::run`'s
//! `loop { sleep(INTERVAL).await; run_cycle().await; }` shape — sequential,
//! never interval-ticker-based, so a slow cycle simply delays the next one
//! rather than firing concurrently (spec invariant: at most one cycle in
//! flight). In-cycle fan-out bounded concurrency follows
//! `acquisition::scanner::scan_subnet`'s `Semaphore` + spawned-task pattern.

use crate::config::EngineConfig;
use crate::contracts::{Notifier, Prober, Rescanner};
use crate::error::HealthError;
use crate::model::FileHealthRecord;
use crate::orchestrator::CheckOrchestrator;
use crate::registry::ActiveCheckRegistry;
use crate::state_machine::StateMachine;
use crate::stats::{WorkerStats, WorkerStatsSnapshot};
use crate::store::HealthStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct RunningHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns the engine's background tick loop.
pub struct Worker {
    store: Arc<dyn HealthStore>,
    orchestrator: Arc<CheckOrchestrator>,
    state_machine: Arc<StateMachine>,
    registry: Arc<ActiveCheckRegistry>,
    config: EngineConfig,
    stats: WorkerStats,
    handle: Mutex<Option<RunningHandle>>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn HealthStore>,
        prober: Arc<dyn Prober>,
        rescanner: Arc<dyn Rescanner>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(ActiveCheckRegistry::new());
        let state_machine = Arc::new(StateMachine::new(store.clone(), rescanner));
        let orchestrator = Arc::new(CheckOrchestrator::new(
            store.clone(),
            prober,
            notifier,
            state_machine.clone(),
            registry.clone(),
        ));
        Self {
            store,
            orchestrator,
            state_machine,
            registry,
            config,
            stats: WorkerStats::new(),
            handle: Mutex::new(None),
        }
    }

    /// Shared handle used by `ManualApi` to register/cancel on-demand checks
    /// against the same registry the cycle loop uses.
    pub(crate) fn registry(&self) -> Arc<ActiveCheckRegistry> {
        self.registry.clone()
    }

    pub(crate) fn orchestrator(&self) -> Arc<CheckOrchestrator> {
        self.orchestrator.clone()
    }

    pub(crate) fn state_machine(&self) -> Arc<StateMachine> {
        self.state_machine.clone()
    }

    pub(crate) fn store(&self) -> Arc<dyn HealthStore> {
        self.store.clone()
    }

    pub(crate) fn stats_handle(&self) -> WorkerStats {
        self.stats.clone()
    }

    /// Start the tick loop. Fails with [`HealthError::AlreadyRunning`] if
    /// already started. `outer_ctx` bounds the loop's own lifetime; cancelling
    /// it is equivalent to calling [`Worker::stop`].
    pub async fn start(&self, outer_ctx: CancellationToken) -> Result<(), HealthError> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return Err(HealthError::AlreadyRunning);
        }

        if let Err(e) = self.store.reset_all_checking().await {
            warn!(error = %e, "startup reconciliation failed, continuing with stale Checking records");
        }

        let cancel = outer_ctx.child_token();
        self.stats.mark_idle(None).await;

        let store = self.store.clone();
        let orchestrator = self.orchestrator.clone();
        let state_machine = self.state_machine.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let loop_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            run_tick_loop(store, orchestrator, state_machine, config, stats, loop_cancel).await;
        });

        *guard = Some(RunningHandle { cancel, join });
        info!("worker started");
        Ok(())
    }

    /// Stop the loop. Signals the loop not to start a new cycle, then waits
    /// for any cycle already in flight to finish — individual active checks
    /// are not cancelled; they are allowed to run to completion.
    pub async fn stop(&self) -> Result<(), HealthError> {
        let handle = {
            let mut guard = self.handle.lock().await;
            guard.take().ok_or(HealthError::NotRunning)?
        };
        handle.cancel.cancel();
        let _ = handle.join.await;
        self.stats.mark_stopped().await;
        info!("worker stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    pub async fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot().await
    }
}

async fn run_tick_loop(
    store: Arc<dyn HealthStore>,
    orchestrator: Arc<CheckOrchestrator>,
    state_machine: Arc<StateMachine>,
    config: EngineConfig,
    stats: WorkerStats,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.check_interval) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        run_cycle(&store, &orchestrator, &state_machine, &config, &stats, &cancel).await;

        let next = Utc::now()
            + chrono::Duration::from_std(config.check_interval).unwrap_or(chrono::Duration::zero());
        stats.mark_idle(Some(next)).await;
    }
}

async fn run_cycle(
    store: &Arc<dyn HealthStore>,
    orchestrator: &Arc<CheckOrchestrator>,
    state_machine: &Arc<StateMachine>,
    config: &EngineConfig,
    stats: &WorkerStats,
    cancel: &CancellationToken,
) {
    stats.cycle_started(Utc::now()).await;

    let due_check = match store.fetch_due_for_check(config.max_concurrent_jobs).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "fetch_due_for_check failed, skipping cycle");
            stats.check_failed(e.to_string()).await;
            stats.cycle_completed(Utc::now()).await;
            return;
        }
    };
    let due_repair = match store.fetch_due_for_repair(config.max_concurrent_jobs).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "fetch_due_for_repair failed, skipping repair fan-out this cycle");
            Vec::new()
        }
    };

    info!(
        checks = due_check.len(),
        repairs = due_repair.len(),
        "cycle starting"
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
    let mut tasks = JoinSet::new();

    for record in due_check {
        tasks.spawn(spawn_check_task(
            record,
            store.clone(),
            orchestrator.clone(),
            stats.clone(),
            semaphore.clone(),
            cancel.clone(),
        ));
    }
    for record in due_repair {
        tasks.spawn(spawn_repair_task(
            record,
            state_machine.clone(),
            semaphore.clone(),
            cancel.clone(),
        ));
    }

    while tasks.join_next().await.is_some() {}

    stats.cycle_completed(Utc::now()).await;
}

async fn spawn_check_task(
    record: FileHealthRecord,
    store: Arc<dyn HealthStore>,
    orchestrator: Arc<CheckOrchestrator>,
    stats: WorkerStats,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return;
    };
    if cancel.is_cancelled() {
        return;
    }

    if let Err(e) = store.set_checking(&record.file_path).await {
        warn!(file_path = %record.file_path, error = %e, "set_checking failed, skipping this cycle");
        return;
    }

    match orchestrator.run(&record.file_path, cancel).await {
        Ok(outcome) => stats.file_checked(&outcome).await,
        Err(HealthError::Cancelled | HealthError::AlreadyActive) => {}
        Err(e) => {
            warn!(file_path = %record.file_path, error = %e, "check failed");
            stats.check_failed(e.to_string()).await;
        }
    }
}

async fn spawn_repair_task(
    record: FileHealthRecord,
    state_machine: Arc<StateMachine>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return;
    };
    if cancel.is_cancelled() {
        return;
    }

    match state_machine.trigger_repair(&record.file_path, None).await {
        Ok(()) => {}
        Err(HealthError::RepairPreconditionMissing) => {
            if let Err(e) = state_machine
                .record_repair_precondition_missing(
                    &record.file_path,
                    Some("library_ref missing".to_string()),
                )
                .await
            {
                warn!(file_path = %record.file_path, error = %e, "failed to persist repair-retry bump");
            }
        }
        Err(e) => {
            warn!(file_path = %record.file_path, error = %e, "repair attempt failed terminally");
        }
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

    struct AlwaysHealthy;
    #[async_trait]
    impl Prober for AlwaysHealthy {
        async fn probe(&self, _file_path: &str, _cancel: CancellationToken) -> ProbeOutcome {
            ProbeOutcome::Healthy
        }
    }

    struct OkRescanner {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl Rescanner for OkRescanner {
        async fn rescan(&self, _library_ref: &str) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoopNotifier;
    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn notify(&self, _file_path: &str, _outcome: &ProbeOutcome) {}
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            check_interval: Duration::from_millis(10),
            max_concurrent_jobs: 4,
            repair_recheck_delay: Duration::from_secs(3600),
            retry_backoff_base: Duration::from_secs(60),
            retry_backoff_cap: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn start_twice_fails_with_already_running() {
        let store = Arc::new(InMemoryHealthStore::default());
        let worker = Worker::new(
            store,
            Arc::new(AlwaysHealthy),
            Arc::new(OkRescanner {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(NoopNotifier),
            test_config(),
        );

        let ctx = CancellationToken::new();
        worker.start(ctx.clone()).await.unwrap();
        let err = worker.start(ctx).await.unwrap_err();
        assert!(matches!(err, HealthError::AlreadyRunning));
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_fails_with_not_running() {
        let store = Arc::new(InMemoryHealthStore::default());
        let worker = Worker::new(
            store,
            Arc::new(AlwaysHealthy),
            Arc::new(OkRescanner {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(NoopNotifier),
            test_config(),
        );
        let err = worker.stop().await.unwrap_err();
        assert!(matches!(err, HealthError::NotRunning));
    }

    #[tokio::test]
    async fn cycle_transitions_pending_file_to_healthy() {
        let store = Arc::new(InMemoryHealthStore::new(
            Duration::from_secs(60),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            3,
            2,
        ));
        store.upsert_pending("/m/x.mkv", None).await.unwrap();

        let worker = Worker::new(
            store.clone(),
            Arc::new(AlwaysHealthy),
            Arc::new(OkRescanner {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(NoopNotifier),
            test_config(),
        );

        let ctx = CancellationToken::new();
        worker.start(ctx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.stop().await.unwrap();

        let rec = store.get("/m/x.mkv").await.unwrap().unwrap();
        assert_eq!(rec.status, FileStatus::Healthy);
        assert!(worker.stats().await.total_files_healthy >= 1);
    }
}
