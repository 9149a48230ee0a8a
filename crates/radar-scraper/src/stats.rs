use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::pacing::{millis, PacingPolicy};

/// Run-scoped request counters.
///
/// `requests` counts every HTTP attempt, retries included. `successes` and
/// `failures` count `fetch` calls by outcome.
#[derive(Debug, Default)]
pub struct FetchStats {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    skipped_deep: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchStatsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub skipped_deep: u64,
    /// Successful fetches per HTTP attempt, as a percentage.
    pub success_rate: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl FetchStats {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// An already-captured item was refreshed without a deep fetch.
    pub fn record_skipped_deep(&self) {
        self.skipped_deep.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn skipped_deep(&self) -> u64 {
        self.skipped_deep.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters together with the pacing window
    /// currently in force.
    #[must_use]
    pub fn snapshot(&self, pacing: &PacingPolicy) -> FetchStatsSnapshot {
        let requests = self.requests();
        let successes = self.successes();
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if requests == 0 {
            0.0
        } else {
            successes as f64 / requests as f64 * 100.0
        };
        FetchStatsSnapshot {
            requests,
            successes,
            failures: self.failures(),
            retries: self.retries(),
            rate_limited: self.rate_limited(),
            skipped_deep: self.skipped_deep(),
            success_rate,
            min_delay_ms: millis(pacing.min_delay),
            max_delay_ms: millis(pacing.max_delay),
        }
    }
}
