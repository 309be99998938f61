//! `Engine` — the composition root wiring a `HealthStore`, `Prober`,
//! `Rescanner`, `Notifier` and `EngineConfig` into a running `Worker` +
//! `ManualApi` pair (spec §9).
//!
//! No process-wide singleton: every collaborator is passed in by value, so
//! two `Engine`s with disjoint stores can run in the same process (spec §9,
//! deliberately departing from `config::init()`/`config::get()`'s global
//! pattern — see `crate::config`).

use crate::config::EngineConfig;
use crate::contracts::{Notifier, Prober, Rescanner};
use crate::error::HealthError;
use crate::manual_api::ManualApi;
use crate::stats::WorkerStatsSnapshot;
use crate::store::HealthStore;
use crate::worker::Worker;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Engine {
    worker: Arc<Worker>,
    manual_api: ManualApi,
}

impl Engine {
    pub fn new(
        store: Arc<dyn HealthStore>,
        prober: Arc<dyn Prober>,
        rescanner: Arc<dyn Rescanner>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let worker = Arc::new(Worker::new(store, prober, rescanner, notifier, config));
        let manual_api = ManualApi::new(worker.clone());
        Self { worker, manual_api }
    }

    /// Start the health-check/repair cycle loop.
    pub async fn start(&self, outer_ctx: CancellationToken) -> Result<(), HealthError> {
        self.worker.start(outer_ctx).await
    }

    /// Stop the cycle loop, waiting for any in-flight cycle to finish.
    pub async fn stop(&self) -> Result<(), HealthError> {
        self.worker.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.worker.is_running().await
    }

    pub async fn stats(&self) -> WorkerStatsSnapshot {
        self.worker.stats().await
    }

    /// On-demand single-file operations (spec §4.6).
    pub fn manual(&self) -> &ManualApi {
        &self.manual_api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn engine() -> (Arc<InMemoryHealthStore>, Engine) {
        let store = Arc::new(InMemoryHealthStore::default());
        let engine = Engine::new(
            store.clone(),
            Arc::new(AlwaysHealthy),
            Arc::new(NoopRescanner),
            Arc::new(NoopNotifier),
            EngineConfig {
                check_interval: Duration::from_millis(10),
                ..EngineConfig::default()
            },
        );
        (store, engine)
    }

    #[tokio::test]
    async fn two_engines_with_disjoint_stores_run_independently() {
        let (store_a, engine_a) = engine();
        let (store_b, engine_b) = engine();

        store_a.upsert_pending("/m/a.mkv", None).await.unwrap();
        store_b.upsert_pending("/m/b.mkv", None).await.unwrap();

        engine_a.start(CancellationToken::new()).await.unwrap();
        engine_b.start(CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine_a.stop().await.unwrap();
        engine_b.stop().await.unwrap();

        assert_eq!(
            store_a.get("/m/a.mkv").await.unwrap().unwrap().status,
            FileStatus::Healthy
        );
        assert_eq!(
            store_b.get("/m/b.mkv").await.unwrap().unwrap().status,
            FileStatus::Healthy
        );
        assert!(store_a.get("/m/b.mkv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn manual_add_to_check_is_visible_to_the_cycle() {
        let (store, engine) = engine();
        engine.start(CancellationToken::new()).await.unwrap();
        engine.manual().add_to_check("/m/new.mkv", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.stop().await.unwrap();

        assert_eq!(
            store.get("/m/new.mkv").await.unwrap().unwrap().status,
            FileStatus::Healthy
        );
    }
}
