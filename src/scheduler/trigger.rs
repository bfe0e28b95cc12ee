//! Cron-style triggers
//!
//! A [`CronTrigger`] fires at a fixed time of day on the days of the month
//! selected by its [`DayInterval`]. `*/N` follows cron day-of-month step
//! semantics: days `1, 1+N, 1+2N, ...` of every month, restarting at day 1.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::schedule::{DayInterval, RecurrenceDescriptor};
use super::slots::TimeOfDay;

/// Longest gap between two fire days: a step wider than the month only
/// matches day 1.
const MAX_SEARCH_DAYS: i64 = 62;

// ============================================================================
// Cron Trigger
// ============================================================================

/// Recurring trigger evaluated against wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronTrigger {
    pub day_interval: DayInterval,
    pub time: TimeOfDay,

    /// Upper bound of the random delay added to each fire time
    pub jitter_secs: u64,
}

impl CronTrigger {
    /// Trigger for a stored recurrence descriptor
    pub fn from_descriptor(descriptor: &RecurrenceDescriptor) -> Self {
        Self {
            day_interval: descriptor.day_interval,
            time: descriptor.time(),
            jitter_secs: 0,
        }
    }

    /// Every day at `time`
    pub fn daily_at(time: TimeOfDay) -> Self {
        Self {
            day_interval: DayInterval::EveryDay,
            time,
            jitter_secs: 0,
        }
    }

    /// Set the jitter bound
    pub fn with_jitter(mut self, jitter_secs: u64) -> Self {
        self.jitter_secs = jitter_secs;
        self
    }

    /// Human readable description used in snapshots and logs
    pub fn describe(&self) -> String {
        format!(
            "cron[day='{}', hour='{}', minute='{}', second='{}']",
            self.day_interval, self.time.hour, self.time.minute, self.time.second
        )
    }

    /// Whether the trigger fires on `date`
    pub fn fires_on(&self, date: NaiveDate) -> bool {
        self.day_interval.matches_day(date.day())
    }

    /// First fire time strictly after `after`, without jitter.
    ///
    /// Local times skipped by a DST transition are not fire times; the
    /// search moves on to the next matching day.
    pub fn next_fire_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.date_naive();

        for offset in 0..=MAX_SEARCH_DAYS {
            let date = start + Duration::days(offset);
            if !self.fires_on(date) {
                continue;
            }

            let naive = date.and_hms_opt(self.time.hour, self.time.minute, self.time.second)?;
            if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
                if candidate > *after {
                    return Some(candidate);
                }
            }
        }

        None
    }

    /// Random delay in `[0, jitter_secs]` applied at fire time
    pub fn jitter(&self) -> std::time::Duration {
        if self.jitter_secs == 0 {
            return std::time::Duration::ZERO;
        }
        let bound = self.jitter_secs.saturating_mul(1000);
        let millis = rand::thread_rng().gen_range(0..=bound);
        std::time::Duration::from_millis(millis)
    }
}

impl From<&RecurrenceDescriptor> for CronTrigger {
    fn from(descriptor: &RecurrenceDescriptor) -> Self {
        Self::from_descriptor(descriptor)
    }
}

/// Time to sleep from `now` until `target`, zero if already passed
pub fn duration_until<Tz: TimeZone>(now: &DateTime<Tz>, target: &DateTime<Tz>) -> std::time::Duration {
    target
        .clone()
        .signed_duration_since(now.clone())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn trigger(days: u32, h: u32, m: u32, s: u32) -> CronTrigger {
        CronTrigger {
            day_interval: DayInterval::every(days),
            time: TimeOfDay::new(h, m, s).unwrap(),
            jitter_secs: 0,
        }
    }

    #[test]
    fn test_daily_later_today() {
        let t = trigger(1, 8, 0, 0);
        let next = t.next_fire_after(&at(2024, 5, 10, 7, 59, 59)).unwrap();
        assert_eq!(next, at(2024, 5, 10, 8, 0, 0));
    }

    #[test]
    fn test_daily_strictly_after() {
        let t = trigger(1, 8, 0, 0);
        let next = t.next_fire_after(&at(2024, 5, 10, 8, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 5, 11, 8, 0, 0));
    }

    #[test]
    fn test_step_days_follow_day_of_month() {
        // */3 fires on days 1, 4, 7, ...
        let t = trigger(3, 0, 30, 0);
        let next = t.next_fire_after(&at(2024, 5, 2, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 5, 4, 0, 30, 0));
    }

    #[test]
    fn test_step_restarts_at_month_boundary() {
        // May has 31 days; */3 matches the 31st, then restarts on June 1st.
        let t = trigger(3, 16, 0, 0);
        let next = t.next_fire_after(&at(2024, 5, 31, 17, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 6, 1, 16, 0, 0));
    }

    #[test]
    fn test_wide_step_only_first_of_month() {
        let t = trigger(40, 1, 0, 0);
        let next = t.next_fire_after(&at(2024, 2, 2, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 1, 1, 0, 0));
    }

    #[test]
    fn test_from_descriptor() {
        let mut descriptor = RecurrenceDescriptor::daily_at(TimeOfDay::new(8, 0, 0).unwrap());
        descriptor.day_interval = DayInterval::every(2);

        let t = CronTrigger::from(&descriptor);
        assert_eq!(t.day_interval, DayInterval::EveryNDays(2));
        assert_eq!(t.time, TimeOfDay::new(8, 0, 0).unwrap());
        assert_eq!(t.describe(), descriptor.to_string());
    }

    #[test]
    fn test_jitter_bounded() {
        let t = trigger(1, 0, 0, 0).with_jitter(10);
        for _ in 0..100 {
            assert!(t.jitter() <= std::time::Duration::from_secs(10));
        }
        assert_eq!(trigger(1, 0, 0, 0).jitter(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_huge_jitter_saturates() {
        let t = CronTrigger::daily_at(TimeOfDay::MIDNIGHT).with_jitter(u64::MAX / 100);
        for _ in 0..10 {
            assert!(t.jitter() <= std::time::Duration::from_millis(u64::MAX));
        }
    }

    #[test]
    fn test_duration_until() {
        let now = at(2024, 1, 1, 0, 0, 0);
        assert_eq!(
            duration_until(&now, &at(2024, 1, 1, 0, 1, 0)),
            std::time::Duration::from_secs(60)
        );
        assert_eq!(
            duration_until(&now, &at(2023, 12, 31, 0, 0, 0)),
            std::time::Duration::ZERO
        );
    }
}
