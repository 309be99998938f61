//! Pure scheduling policy (spec §4.2). Stateless: every function takes
//! `now` explicitly so it can be unit-tested without wall-clock flakiness.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Computes the next health-check timestamp from a file's release age.
///
/// Freshly released files are checked more often; aged files back off.
/// Thresholds (documented per spec §4.2 — policy, tunable, but the curve
/// itself must be documented wherever it's implemented):
///
/// | age              | next check in |
/// |------------------|----------------|
/// | < 24h             | 1h             |
/// | < 7d               | 6h             |
/// | < 30d              | 24h            |
/// | >= 30d             | 7d             |
pub fn next_check_at(release_date: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let age = (now - release_date).max(ChronoDuration::zero());

    let delta = if age < ChronoDuration::hours(24) {
        ChronoDuration::hours(1)
    } else if age < ChronoDuration::days(7) {
        ChronoDuration::hours(6)
    } else if age < ChronoDuration::days(30) {
        ChronoDuration::hours(24)
    } else {
        ChronoDuration::days(7)
    };

    now + delta
}

/// Exponential backoff for a failed health check: `now + min(base * 2^n, cap)`.
///
/// Used by `HealthStore::increment_retry`.
pub fn retry_backoff(retry_count: u32, base: Duration, cap: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let multiplier = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    let backoff_secs = base.as_secs().saturating_mul(multiplier).min(cap.as_secs());
    now + ChronoDuration::seconds(backoff_secs as i64)
}

/// Flat recheck delay for a record sitting in `RepairTriggered`.
pub fn repair_recheck_at(delay: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    now + ChronoDuration::seconds(delay.as_secs() as i64)
}
