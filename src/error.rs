//! Engine-facing error types (spec §7).

/// Errors surfaced by the core engine's public operations.
///
/// Every per-file failure also manifests as a change to the corresponding
/// `FileHealthRecord` (status, counters, or `last_error`) — this type is what
/// the *caller* of `Worker`/`ManualApi`/`CheckOrchestrator` sees, not what
/// gets persisted.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("worker is already running")]
    AlreadyRunning,

    #[error("worker is not running")]
    NotRunning,

    #[error("a check is already active for this path")]
    AlreadyActive,

    #[error("no active check for this path")]
    NoActiveCheck,

    #[error("check was cancelled")]
    Cancelled,

    #[error("check exceeded its deadline")]
    Timeout,

    #[error("repair requires a library_ref, which is missing")]
    RepairPreconditionMissing,

    #[error("store error: {0}")]
    StoreError(String),

    #[error("probe error: {0}")]
    ProbeError(String),

    #[error("rescan error: {0}")]
    RescanError(String),
}

impl From<crate::store::StoreError> for HealthError {
    fn from(err: crate::store::StoreError) -> Self {
        HealthError::StoreError(err.to_string())
    }
}
