//! Construction-time engine configuration.
//!
//! No config-file parsing lives here (spec §1 lists it as an external
//! collaborator's concern) and there is no process-wide singleton — the
//! embedding application builds an `EngineConfig` however it likes (TOML,
//! env vars, hardcoded) and passes it into `Engine::new`/`Worker::new` by
//! value, matching spec §9's "no global state" design note.

use std::time::Duration;

/// Default cycle period (spec §6).
pub const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 5;
/// Default in-cycle parallelism (spec §6).
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
/// Default repair recheck delay (spec §6).
pub const DEFAULT_REPAIR_RECHECK_DELAY_SECONDS: u64 = 3600;
/// Default retry backoff base (spec §4.2).
pub const DEFAULT_RETRY_BACKOFF_BASE_SECONDS: u64 = 60;
/// Default retry backoff cap (spec §4.2).
pub const DEFAULT_RETRY_BACKOFF_CAP_SECONDS: u64 = 3600;
/// Hard deadline for a manual on-demand check (spec §5).
pub const MANUAL_CHECK_DEADLINE: Duration = Duration::from_secs(600);

/// Engine-wide configuration (spec §6 "Configuration").
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cycle period. Values `<= 0` (as seconds, before the `Duration`
    /// conversion) fall back to [`DEFAULT_CHECK_INTERVAL_SECONDS`] — see
    /// [`EngineConfig::check_interval_seconds`].
    pub check_interval: Duration,
    /// Cycle parallelism — how many of the due batch run concurrently.
    pub max_concurrent_jobs: usize,
    /// Delay before rechecking a `RepairTriggered` record.
    pub repair_recheck_delay: Duration,
    /// Base of the exponential retry backoff.
    pub retry_backoff_base: Duration,
    /// Cap of the exponential retry backoff.
    pub retry_backoff_cap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECONDS),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            repair_recheck_delay: Duration::from_secs(DEFAULT_REPAIR_RECHECK_DELAY_SECONDS),
            retry_backoff_base: Duration::from_secs(DEFAULT_RETRY_BACKOFF_BASE_SECONDS),
            retry_backoff_cap: Duration::from_secs(DEFAULT_RETRY_BACKOFF_CAP_SECONDS),
        }
    }
}

impl EngineConfig {
    /// Build a config from raw seconds, applying the "`<= 0` falls back to
    /// default" rule from spec §6 to `check_interval_seconds`.
    pub fn from_seconds(
        check_interval_seconds: i64,
        max_concurrent_jobs: usize,
        repair_recheck_delay_seconds: u64,
        retry_backoff_base_seconds: u64,
        retry_backoff_cap_seconds: u64,
    ) -> Self {
        let check_interval = if check_interval_seconds <= 0 {
            Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECONDS)
        } else {
            Duration::from_secs(check_interval_seconds as u64)
        };
        let max_concurrent_jobs = if max_concurrent_jobs == 0 {
            DEFAULT_MAX_CONCURRENT_JOBS
        } else {
            max_concurrent_jobs
        };
        Self {
            check_interval,
            max_concurrent_jobs,
            repair_recheck_delay: Duration::from_secs(repair_recheck_delay_seconds),
            retry_backoff_base: Duration::from_secs(retry_backoff_base_seconds),
            retry_backoff_cap: Duration::from_secs(retry_backoff_cap_seconds),
        }
    }
}
