//! Crawl interval derivation from comment growth
//!
//! A title that gains comments slowly is crawled less often. The interval in
//! days is `target / delta + 1`, clamped into `[min_interval, max_interval]`.

use serde::{Deserialize, Serialize};

use super::error::{SchedulerError, SchedulerResult};

/// Derive the re-crawl interval in days from two successive comment counts.
///
/// `floor(target / delta) + 1` over-approximates `ceil(target / delta)` by one
/// when the ratio is exact; the clamp saturates it at `min_interval` for fast
/// growing titles.
///
/// # Errors
///
/// Returns [`SchedulerError::ZeroDelta`] when `current_count <= previous_count`.
/// Callers are expected to guard that case and pick `max_interval` instead.
///
/// # Example
///
/// ```
/// use cinetrack::scheduler::interval::compute_interval;
///
/// assert_eq!(compute_interval(500, 1500, 1000, 1, 10).unwrap(), 1);
/// assert_eq!(compute_interval(0, 1, 1000, 1, 10).unwrap(), 10);
/// assert!(compute_interval(10, 10, 1000, 1, 10).is_err());
/// ```
pub fn compute_interval(
    previous_count: u64,
    current_count: u64,
    target_increment_per_day: u64,
    min_interval: u32,
    max_interval: u32,
) -> SchedulerResult<u32> {
    if current_count <= previous_count {
        return Err(SchedulerError::zero_delta(previous_count, current_count));
    }
    let delta = current_count - previous_count;

    let raw = (target_increment_per_day / delta).saturating_add(1);
    let raw = u32::try_from(raw).unwrap_or(u32::MAX);

    Ok(raw.min(max_interval).max(min_interval))
}

/// Interval parameters bundled from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalPolicy {
    /// Comment increment that justifies one crawl per day
    pub target_increment_per_day: u64,

    /// Lower bound of the interval in days
    pub min_interval: u32,

    /// Upper bound of the interval in days
    pub max_interval: u32,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self {
            target_increment_per_day: 1000,
            min_interval: 1,
            max_interval: 10,
        }
    }
}

impl IntervalPolicy {
    /// Check bounds and target
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.min_interval == 0 {
            return Err(SchedulerError::invalid_config(
                "min_interval",
                "must be at least 1 day",
            ));
        }
        if self.min_interval > self.max_interval {
            return Err(SchedulerError::invalid_config(
                "max_interval",
                format!(
                    "must not be below min_interval ({} < {})",
                    self.max_interval, self.min_interval
                ),
            ));
        }
        if self.target_increment_per_day == 0 {
            return Err(SchedulerError::invalid_config(
                "target_increment_per_day",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Interval for an observed growth
    pub fn compute(&self, previous_count: u64, current_count: u64) -> SchedulerResult<u32> {
        compute_interval(
            previous_count,
            current_count,
            self.target_increment_per_day,
            self.min_interval,
            self.max_interval,
        )
    }

    /// Interval for an observed growth, treating "no growth" as the slowest cadence
    pub fn compute_or_max(&self, previous_count: u64, current_count: u64) -> u32 {
        match self.compute(previous_count, current_count) {
            Ok(days) => days,
            Err(_) => self.max_interval,
        }
    }
}
