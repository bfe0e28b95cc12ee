//! Time-of-day slot allocation for recurring crawl jobs
//!
//! Jobs are spread evenly over 24 hours in input order: the i-th job fires at
//! `i * floor(86400 / J)` seconds after midnight. Slots that land inside the
//! protected window around midnight are pushed to its edge, because the daily
//! maintenance job fires at `00:00:00`. The resulting skew near midnight is
//! intentional.
//!
//! Input order is part of the contract. Reordering the job ids moves every
//! slot, and adding or removing a single job changes the spacing of all of
//! them, so the allocation is always recomputed for the whole job set.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{SchedulerError, SchedulerResult};

/// Seconds in a day
pub const SECONDS_PER_DAY: u32 = 86_400;

const SECONDS_PER_HOUR: u32 = 3_600;
const SECONDS_PER_MINUTE: u32 = 60;

// ============================================================================
// Time Of Day
// ============================================================================

/// Wall-clock firing time within a single day
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl TimeOfDay {
    /// Midnight
    pub const MIDNIGHT: TimeOfDay = TimeOfDay {
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Create a validated time of day
    pub fn new(hour: u32, minute: u32, second: u32) -> SchedulerResult<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(SchedulerError::InvalidTime {
                hour,
                minute,
                second,
            });
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    /// Split an offset from midnight into hour, minute and second
    pub fn from_offset(offset_seconds: u32) -> Self {
        let hour = offset_seconds / SECONDS_PER_HOUR;
        let remaining = offset_seconds % SECONDS_PER_HOUR;
        Self {
            hour,
            minute: remaining / SECONDS_PER_MINUTE,
            second: remaining % SECONDS_PER_MINUTE,
        }
    }

    /// Seconds elapsed since midnight
    pub fn seconds_of_day(&self) -> u32 {
        self.hour * SECONDS_PER_HOUR + self.minute * SECONDS_PER_MINUTE + self.second
    }

    /// Apply the midnight grace window
    pub fn with_grace(mut self, grace_minutes: u32) -> Self {
        let upper = SECONDS_PER_MINUTE.saturating_sub(grace_minutes);
        match self.hour {
            0 => self.minute = self.minute.max(grace_minutes),
            23 => self.minute = self.minute.min(upper),
            24 => {
                self.hour = 23;
                self.minute = self.minute.max(upper);
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

// ============================================================================
// Allocation
// ============================================================================

/// Spacing in seconds between two adjacent jobs, `None` for an empty job set
pub fn slot_spacing(job_count: usize) -> Option<u32> {
    if job_count == 0 {
        return None;
    }
    let count = u32::try_from(job_count).unwrap_or(u32::MAX);
    Some(SECONDS_PER_DAY / count)
}

/// Compute a firing time for every job id, preserving input order.
///
/// An empty input yields an empty allocation.
///
/// # Example
///
/// ```
/// use cinetrack::scheduler::slots::allocate_slots;
///
/// let slots = allocate_slots(["A", "B", "C"], 30);
/// let times: Vec<String> = slots.iter().map(|(_, t)| t.to_string()).collect();
/// assert_eq!(times, ["00:30:00", "08:00:00", "16:00:00"]);
/// ```
pub fn allocate_slots<I, K>(job_ids: I, grace_minutes: u32) -> Vec<(K, TimeOfDay)>
where
    I: IntoIterator<Item = K>,
{
    let ids: Vec<K> = job_ids.into_iter().collect();
    let Some(spacing) = slot_spacing(ids.len()) else {
        return Vec::new();
    };

    ids.into_iter()
        .enumerate()
        .map(|(i, id)| {
            let offset = (i as u32).saturating_mul(spacing);
            (id, TimeOfDay::from_offset(offset).with_grace(grace_minutes))
        })
        .collect()
}

/// Like [`allocate_slots`] but treats an empty job set as a fault
pub fn allocate_slots_nonempty<I, K>(
    job_ids: I,
    grace_minutes: u32,
) -> SchedulerResult<Vec<(K, TimeOfDay)>>
where
    I: IntoIterator<Item = K>,
{
    let slots = allocate_slots(job_ids, grace_minutes);
    if slots.is_empty() {
        return Err(SchedulerError::NoJobs);
    }
    Ok(slots)
}
