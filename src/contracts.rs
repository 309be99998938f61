//! The three narrow external collaborators this engine calls out to (spec §6).
//!
//! `HealthStore` is large enough to warrant its own module (`crate::store`);
//! these three are small enough to live together.

use crate::model::ProbeOutcome;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Byte-level content verification, opaque to the engine.
///
/// Implementations may sample a fraction of the underlying storage; the
/// engine does not care how the outcome was derived, only which of the
/// three it gets back.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, file_path: &str, cancel: CancellationToken) -> ProbeOutcome;
}

/// The external library manager. Triggers re-acquisition of a file.
///
/// Idempotent from the engine's point of view — the external system may
/// deduplicate concurrent requests for the same `library_ref`.
#[async_trait]
pub trait Rescanner: Send + Sync {
    async fn rescan(&self, library_ref: &str) -> Result<(), String>;
}

/// Best-effort notification sink (e.g. a virtual-filesystem change
/// notifier). Errors are logged by the caller, never propagated.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, file_path: &str, outcome: &ProbeOutcome);
}
