//! Elapsed-time estimation from heartbeat gaps.
//!
//! # Algorithm Summary
//!
//! 1. Sort timestamps ascending
//! 2. Consecutive heartbeats no further apart than the idle threshold form one
//!    continuous span; each such gap counts in full
//! 3. The last heartbeat of every span adds a fixed epsilon, since nothing
//!    follows it to measure against
//! 4. Gaps above the threshold count for nothing

use chrono::{DateTime, Duration, Utc};

/// Configuration for duration estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationConfig {
    /// Largest gap between two heartbeats still counted as continuous work.
    /// Default: 120 seconds.
    pub idle_threshold: Duration,

    /// Time credited to the final heartbeat of each span.
    /// Default: 1 second.
    pub span_epsilon: Duration,
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::seconds(120), // 2 minutes
            span_epsilon: Duration::seconds(1),
        }
    }
}

impl DurationConfig {
    /// Builds a config from whole seconds, clamping negatives to zero.
    pub fn from_secs(idle_threshold_secs: i64, span_epsilon_secs: i64) -> Self {
        Self {
            idle_threshold: Duration::seconds(idle_threshold_secs.max(0)),
            span_epsilon: Duration::seconds(span_epsilon_secs.max(0)),
        }
    }
}

/// Estimates the elapsed time covered by a set of heartbeat timestamps.
///
/// Input does not need to be sorted. An empty input yields zero.
pub fn estimate<I>(timestamps: I, config: &DurationConfig) -> Duration
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut sorted: Vec<DateTime<Utc>> = timestamps.into_iter().collect();
    sorted.sort_unstable();
    estimate_sorted(&sorted, config)
}

/// Same as [`estimate`] for input already in ascending order.
pub fn estimate_sorted(timestamps: &[DateTime<Utc>], config: &DurationConfig) -> Duration {
    if timestamps.is_empty() {
        return Duration::zero();
    }

    let mut total = Duration::zero();
    for pair in timestamps.windows(2) {
        let gap = pair[1] - pair[0];
        if gap <= config.idle_threshold {
            total += gap;
        } else {
            // previous span closes here
            total += config.span_epsilon;
        }
    }
    total + config.span_epsilon
}
