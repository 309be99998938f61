//! `StateMachine` — the two-phase retry/repair escalation automaton
//! (spec §4.4).
//!
//! The current status doubles as the phase discriminator: any non-repair
//! status (`Checking`, reached via `set_checking` from `Pending`/`Corrupted`)
//! routes through the check-retry rows of the transition table;
//! `RepairTriggered` routes through the repair-retry rows. A record in
//! `Pending` observed directly (a manual check that skipped `set_checking`)
//! is treated the same as `Checking`/`Corrupted` for this purpose — the
//! probe drives the transition, not the exact prior status (spec §4.4 edge
//! case note).
//!
//! Grounded on `background::self_healer::SelfHealer::run_cycle`'s
//! dispatch-by-outcome-and-log shape, generalized from a three-state
//! health-check loop to this six-state, two-phase automaton.

use crate::contracts::Rescanner;
use crate::error::HealthError;
use crate::model::{FileHealthRecord, FileStatus, ProbeOutcome};
use crate::scheduler;
use crate::store::HealthStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct StateMachine {
    store: Arc<dyn HealthStore>,
    rescanner: Arc<dyn Rescanner>,
}

impl StateMachine {
    pub fn new(store: Arc<dyn HealthStore>, rescanner: Arc<dyn Rescanner>) -> Self {
        Self { store, rescanner }
    }

    /// Apply a probe outcome to the record it was run against.
    ///
    /// `record` must be the value read just before (or returned by)
    /// `set_checking`/the probe — this reads state that the caller already
    /// fetched rather than re-reading the store, matching `CheckOrchestrator`'s
    /// single-record-in-flight discipline (spec §5: not interleaved with any
    /// other handling of the same file).
    pub async fn apply(
        &self,
        record: &FileHealthRecord,
        outcome: ProbeOutcome,
    ) -> Result<(), HealthError> {
        if record.status == FileStatus::RepairTriggered {
            return self.apply_repair_phase(record, outcome).await;
        }
        // apply_check_phase reports its own errors into the store/logs; the
        // caller (CheckOrchestrator) treats application as best-effort.
        self.apply_check_phase(record, outcome).await;
        Ok(())
    }

    async fn apply_check_phase(&self, record: &FileHealthRecord, outcome: ProbeOutcome) {
        let path = &record.file_path;
        match outcome {
            ProbeOutcome::Healthy => {
                let next = scheduler::next_check_at(record.effective_release_date(), Utc::now());
                if let Err(e) = self.store.mark_healthy(path, next).await {
                    warn!(file_path = %path, error = %e, "failed to persist healthy outcome");
                }
            }
            ProbeOutcome::Corrupted { .. } | ProbeOutcome::CheckFailed { .. } => {
                let error = outcome.describe();
                if escalates(record.retry_count, record.max_retries) {
                    info!(file_path = %path, retry_count = record.retry_count, "escalating to repair");
                    match self.trigger_repair(path, error.clone()).await {
                        Ok(()) => {}
                        Err(HealthError::RepairPreconditionMissing) => {
                            if let Err(e) = self.record_repair_precondition_missing(path, error).await {
                                warn!(file_path = %path, error = %e, "failed to persist repair-retry bump");
                            }
                        }
                        Err(e) => {
                            // Any other failure (e.g. a refused rescan) is
                            // already terminal — trigger_repair marked the
                            // record permanently corrupted itself.
                            warn!(file_path = %path, error = %e, "repair trigger failed terminally");
                        }
                    }
                } else if let Err(e) = self.store.increment_retry(path, error).await {
                    warn!(file_path = %path, error = %e, "failed to persist retry increment");
                }
            }
        }
    }

    async fn apply_repair_phase(
        &self,
        record: &FileHealthRecord,
        outcome: ProbeOutcome,
    ) -> Result<(), HealthError> {
        let path = &record.file_path;
        match outcome {
            ProbeOutcome::Healthy => {
                let next = scheduler::next_check_at(record.effective_release_date(), Utc::now());
                self.store.mark_healthy(path, next).await?;
            }
            ProbeOutcome::Corrupted { .. } | ProbeOutcome::CheckFailed { .. } => {
                let error = outcome.describe();
                if escalates(record.repair_retry_count, record.max_repair_retries) {
                    info!(file_path = %path, "repair retries exhausted, marking permanently corrupted");
                    self.store.mark_permanently_corrupted(path, error).await?;
                } else {
                    self.store.increment_repair_retry(path, error).await?;
                }
            }
        }
        Ok(())
    }

    /// The "trigger repair" procedure (spec §4.4), also invoked directly by
    /// the Worker's repair-notification loop (spec §4.5).
    pub async fn trigger_repair(
        &self,
        file_path: &str,
        check_error: Option<String>,
    ) -> Result<(), HealthError> {
        let record = self
            .store
            .get(file_path)
            .await?
            .ok_or_else(|| HealthError::StoreError("record disappeared".to_string()))?;

        let library_ref = match record.library_ref.as_deref() {
            Some(r) if !r.is_empty() => r,
            _ => {
                // trigger_repair itself makes no store change here; the
                // caller (apply_check_phase or the Worker's repair task)
                // calls record_repair_precondition_missing, which either
                // schedules another retry (moving the record into
                // RepairTriggered so it's picked up by fetch_due_for_repair
                // instead of being orphaned) or, once repair_retry_count is
                // exhausted, marks the record permanently corrupted.
                let _ = check_error;
                warn!(file_path, "repair precondition missing");
                return Err(HealthError::RepairPreconditionMissing);
            }
        };

        match self.rescanner.rescan(library_ref).await {
            Ok(()) => {
                self.store.set_repair_triggered(file_path, None).await?;
                info!(file_path, library_ref, "rescan requested, repair triggered");
                Ok(())
            }
            Err(e) => {
                warn!(file_path, library_ref, error = %e, "rescan refused, permanently corrupted");
                self.store
                    .mark_permanently_corrupted(file_path, Some(e.clone()))
                    .await?;
                Err(HealthError::RescanError(e))
            }
        }
    }

    /// Records a `RepairPreconditionMissing` attempt against the same
    /// `repair_retry_count`/`max_repair_retries` bound genuine rescan
    /// failures use (spec §7: "retried next cycle"). Without a bound this
    /// counter would grow forever with no terminal state: `is_due_for_repair`
    /// stops returning the record once `repair_retry_count` reaches
    /// `max_repair_retries`, and a record whose `library_ref` never arrives
    /// would otherwise sit forever in `RepairTriggered`, due for neither the
    /// check nor the repair query. So once the bound is reached here too, the
    /// record is escalated to `PermanentlyCorrupted` exactly as
    /// `apply_repair_phase` does for an exhausted rescan.
    pub async fn record_repair_precondition_missing(
        &self,
        file_path: &str,
        error: Option<String>,
    ) -> Result<(), HealthError> {
        let record = self
            .store
            .get(file_path)
            .await?
            .ok_or_else(|| HealthError::StoreError("record disappeared".to_string()))?;

        if escalates(record.repair_retry_count, record.max_repair_retries) {
            info!(
                file_path,
                "repair precondition permanently missing, marking permanently corrupted"
            );
            self.store.mark_permanently_corrupted(file_path, error).await?;
        } else {
            self.store.increment_repair_retry(file_path, error).await?;
        }
        Ok(())
    }
}

/// Escalation comparison from spec §4.4/§9: a file with `max = N` escalates
/// on its Nth failure. Evaluated in unsigned arithmetic so `max = 0`
/// escalates immediately (on the first failure), never underflowing.
fn escalates(count: u32, max: u32) -> bool {
    count >= max.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_on_nth_failure() {
        // max_retries = 3: failures at retry_count 0, 1 do not escalate; at 2, do.
        assert!(!escalates(0, 3));
        assert!(!escalates(1, 3));
        assert!(escalates(2, 3));
    }

    #[test]
    fn zero_max_escalates_immediately() {
        assert!(escalates(0, 0));
    }

    #[test]
    fn one_max_escalates_on_first_failure() {
        assert!(escalates(0, 1));
    }
}
