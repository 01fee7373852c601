//! Per-segment retry gate.

use std::{cmp::min, collections::HashMap, time::Duration};

use tokio::time::Instant;

/// Retry policy for failed segment fetches and appends.
///
/// The first retry is immediate; each further one waits
/// `base_delay * 2^(n-1)` capped at `max_delay`. `max_attempts` bounds the
/// number of failures tolerated per segment (`None` = unlimited).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRetryPolicy {
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for SegmentRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl SegmentRetryPolicy {
    /// Retry every failure right away, forever.
    pub fn immediate() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Wait before retrying after the `failures`-th consecutive failure.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(failures - 2);
        min(self.base_delay.saturating_mul(factor), self.max_delay)
    }

    fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// What the tracker decided after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    failures: u32,
    eligible_at: Instant,
    exhausted: bool,
}

/// Failure bookkeeping per segment index.
#[derive(Debug, Default)]
pub struct RetryTracker {
    policy: SegmentRetryPolicy,
    entries: HashMap<usize, Entry>,
}

impl RetryTracker {
    pub fn new(policy: SegmentRetryPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn record_failure(&mut self, index: usize, now: Instant) -> RetryDecision {
        let entry = self.entries.entry(index).or_insert(Entry {
            failures: 0,
            eligible_at: now,
            exhausted: false,
        });
        entry.failures = entry.failures.saturating_add(1);
        if self.policy.is_exhausted(entry.failures) {
            entry.exhausted = true;
            return RetryDecision::Exhausted;
        }
        let after = self.policy.delay_after(entry.failures);
        entry.eligible_at = now + after;
        RetryDecision::Retry { after }
    }

    /// Whether `index` may be fetched at `now`.
    pub fn is_eligible(&self, index: usize, now: Instant) -> bool {
        self.entries
            .get(&index)
            .is_none_or(|e| !e.exhausted && e.eligible_at <= now)
    }

    pub fn is_exhausted(&self, index: usize) -> bool {
        self.entries.get(&index).is_some_and(|e| e.exhausted)
    }

    pub fn failures(&self, index: usize) -> u32 {
        self.entries.get(&index).map_or(0, |e| e.failures)
    }

    /// Forget `index` (after a successful append).
    pub fn clear(&mut self, index: usize) {
        self.entries.remove(&index);
    }

    /// Earliest backoff deadline still in the future.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| !e.exhausted && e.eligible_at > now)
            .map(|e| e.eligible_at)
            .min()
    }
}
