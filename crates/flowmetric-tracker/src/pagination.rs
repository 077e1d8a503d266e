//! Adaptive pagination strategy.
//!
//! | result count N          | batch       | changelog | retries |
//! |-------------------------|-------------|-----------|---------|
//! | `N <= batchSize`        | single page | yes       | N       |
//! | `batchSize < N < huge`  | `batchSize` | yes       | N       |
//! | `N >= hugeThreshold`    | `large`     | no        | N       |
//!
//! Changelog expansion dominates cost on large datasets, so it is
//! disabled above the threshold; status-at-time consumers fall back to
//! the issue's current status and mark the result approximated.

use std::time::Duration;

/// Strategy knobs, mirrored from `issueTracker.pagination` config.
#[derive(Debug, Clone)]
pub struct PaginationSettings {
    /// Master switch; when off, everything uses one unbounded request.
    pub enabled: bool,
    /// Normal batch size.
    pub batch_size: u32,
    /// Count at or above which the huge strategy applies (`>=`).
    pub huge_threshold: u32,
    /// Batch size above the threshold.
    pub large_batch_size: u32,
    /// Expand changelogs even above the threshold.
    pub fetch_changelog_for_large: bool,
    /// Per-batch attempts.
    pub max_retries: u32,
    /// Base retry delay; doubles each attempt.
    pub retry_delay: Duration,
}

impl PaginationSettings {
    /// Backoff before retrying after the given 1-based failed attempt:
    /// `retry_delay · 2^(attempt-1)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.retry_delay.saturating_mul(factor)
    }
}

/// The concrete plan chosen for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationPlan {
    /// Rows per request.
    pub batch_size: u32,
    /// Whether to request changelog expansion.
    pub fetch_changelog: bool,
    /// Whether a single request suffices.
    pub single_request: bool,
    /// Whether status-at-time answers will be approximated.
    pub approximated: bool,
}

impl PaginationPlan {
    /// Choose a plan from the count query's answer.
    #[must_use]
    pub fn for_count(n: u64, settings: &PaginationSettings) -> Self {
        if n >= u64::from(settings.huge_threshold) {
            let fetch_changelog = settings.fetch_changelog_for_large;
            return Self {
                batch_size: settings.large_batch_size,
                fetch_changelog,
                single_request: n <= u64::from(settings.large_batch_size),
                approximated: !fetch_changelog,
            };
        }
        Self {
            batch_size: settings.batch_size,
            fetch_changelog: true,
            single_request: n <= u64::from(settings.batch_size),
            approximated: false,
        }
    }

    /// Plan used when the count query itself is unavailable.
    #[must_use]
    pub fn count_unavailable(settings: &PaginationSettings) -> Self {
        Self {
            batch_size: settings.large_batch_size,
            fetch_changelog: false,
            single_request: false,
            approximated: true,
        }
    }
}
