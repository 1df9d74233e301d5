//! # Retry Policy
//!
//! Decides whether and when a failed queue entry is retried.
//!
//! ## Backoff Schedule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Exponential Backoff (defaults)                       │
//! │                                                                         │
//! │  attempt:   1     2     3     4     5     6     7     8    9+          │
//! │  delay:     2s    4s    8s    16s   32s   64s   128s  256s  300s (cap) │
//! │                                                                         │
//! │  Transient failures (network / timeout / 5xx): retried indefinitely    │
//! │  Permanent failures (4xx validation / auth):   never auto-retried      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The orchestrator consults this policy after every failed remote call and
//! before redelivering an `Error` entry; no entry is ever dropped without
//! classification.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::QueueEntry;

// =============================================================================
// Defaults
// =============================================================================

/// Default base delay before the second attempt.
const DEFAULT_BASE_DELAY_SECS: u64 = 2;

/// Default backoff multiplier.
const DEFAULT_FACTOR: u32 = 2;

/// Default delay cap (5 minutes).
const DEFAULT_MAX_DELAY_SECS: u64 = 300;

// =============================================================================
// Retry Policy
// =============================================================================

/// Exponential backoff with a fixed cap.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied per additional failed attempt.
    pub factor: u32,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(DEFAULT_BASE_DELAY_SECS),
            factor: DEFAULT_FACTOR,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, factor: u32, max_delay: Duration) -> Self {
        RetryPolicy {
            base_delay,
            factor,
            max_delay,
        }
    }

    /// Whether the entry is eligible for automatic redelivery at all.
    ///
    /// Entries that recorded a permanent failure are excluded until a
    /// corrected local edit re-enqueues them or a manual retry resets them.
    pub fn should_retry(&self, entry: &QueueEntry) -> bool {
        entry.retryable
    }

    /// Delay to wait after `attempt_count` failed attempts.
    ///
    /// Non-decreasing in `attempt_count` and capped at `max_delay`.
    /// Zero attempts means the entry has never been tried: no delay.
    pub fn next_attempt_delay(&self, attempt_count: i64) -> Duration {
        if attempt_count <= 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt_count - 1).min(u32::MAX as i64) as u32;
        let multiplier = (self.factor as u64)
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);
        let delay = self
            .base_delay
            .checked_mul(multiplier.min(u32::MAX as u64) as u32)
            .unwrap_or(self.max_delay);

        delay.min(self.max_delay)
    }

    /// Whether the entry's backoff window has elapsed at `now`.
    pub fn is_due(&self, entry: &QueueEntry, now: DateTime<Utc>) -> bool {
        let Some(attempted_at) = entry.attempted_at else {
            return true;
        };

        let delay = self.next_attempt_delay(entry.attempts);
        let delay = match chrono::Duration::from_std(delay) {
            Ok(d) => d,
            Err(_) => return false,
        };

        attempted_at + delay <= now
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OperationKind, SyncStatus};

    fn entry(attempts: i64, retryable: bool, attempted_at: Option<DateTime<Utc>>) -> QueueEntry {
        QueueEntry {
            id: "e-1".into(),
            entity_type: "product".into(),
            entity_id: "p-1".into(),
            operation: OperationKind::Update,
            payload: "{}".into(),
            captured_updated_at: Utc::now(),
            status: SyncStatus::Error,
            attempts,
            retryable,
            last_error: None,
            remote_snapshot: None,
            in_flight: false,
            created_at: Utc::now(),
            attempted_at,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_attempt_delay(0), Duration::ZERO);
        assert_eq!(policy.next_attempt_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_attempt_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_attempt_delay(3), Duration::from_secs(8));
        assert_eq!(policy.next_attempt_delay(8), Duration::from_secs(256));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_attempt_delay(9), Duration::from_secs(300));
        assert_eq!(policy.next_attempt_delay(50), Duration::from_secs(300));
        assert_eq!(policy.next_attempt_delay(i64::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempts in 0..64 {
            let delay = policy.next_attempt_delay(attempts);
            assert!(delay >= previous, "delay decreased at attempt {attempts}");
            previous = delay;
        }
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&entry(3, false, Some(Utc::now()))));
        assert!(policy.should_retry(&entry(3, true, Some(Utc::now()))));
    }

    #[test]
    fn test_never_attempted_is_due() {
        let policy = RetryPolicy::default();
        assert!(policy.is_due(&entry(0, true, None), Utc::now()));
    }

    #[test]
    fn test_due_after_backoff_elapses() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        // One failed attempt 1s ago: 2s backoff has not elapsed.
        let recent = entry(1, true, Some(now - chrono::Duration::seconds(1)));
        assert!(!policy.is_due(&recent, now));

        // One failed attempt 3s ago: due.
        let stale = entry(1, true, Some(now - chrono::Duration::seconds(3)));
        assert!(policy.is_due(&stale, now));
    }

    #[test]
    fn test_custom_policy() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3, Duration::from_secs(10));
        assert_eq!(policy.next_attempt_delay(1), Duration::from_secs(1));
        assert_eq!(policy.next_attempt_delay(2), Duration::from_secs(3));
        assert_eq!(policy.next_attempt_delay(3), Duration::from_secs(9));
        assert_eq!(policy.next_attempt_delay(4), Duration::from_secs(10));
    }
}
