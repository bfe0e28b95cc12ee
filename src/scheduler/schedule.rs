//! Recurrence descriptors and the schedule store
//!
//! The store is the single source of truth for when each comment crawl job
//! should fire. It is loaded at startup, mutated only through the methods
//! below, and written back in full after every change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::{SchedulerError, SchedulerResult};
use super::slots::{allocate_slots, TimeOfDay};
use crate::utils::{read_json_opt, write_json_atomic};

/// Stable key of a scheduled job
pub type JobId = String;

/// Schedule store shared between the daily maintenance job and the feedback loop
pub type SharedScheduleStore = Arc<RwLock<ScheduleStore>>;

// ============================================================================
// Day Interval
// ============================================================================

/// Day-of-month recurrence: every day, or every N days
///
/// Serialized the way a cron day field is written: `*` or `*/N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DayInterval {
    #[default]
    EveryDay,
    EveryNDays(u32),
}

impl DayInterval {
    /// Interval of `days`, where one day collapses to [`DayInterval::EveryDay`]
    pub fn every(days: u32) -> Self {
        if days <= 1 {
            Self::EveryDay
        } else {
            Self::EveryNDays(days)
        }
    }

    /// Step in days
    pub fn days(&self) -> u32 {
        match self {
            Self::EveryDay => 1,
            Self::EveryNDays(n) => *n,
        }
    }

    /// Whether the job fires on the given day of month (1-based)
    pub fn matches_day(&self, day_of_month: u32) -> bool {
        day_of_month >= 1 && (day_of_month - 1) % self.days() == 0
    }
}

impl fmt::Display for DayInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EveryDay => write!(f, "*"),
            Self::EveryNDays(n) => write!(f, "*/{n}"),
        }
    }
}

impl FromStr for DayInterval {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::EveryDay);
        }
        let step = s.strip_prefix("*/").unwrap_or(s);
        match step.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(Self::every(n)),
            _ => Err(SchedulerError::SerializationError {
                reason: format!("invalid day interval '{s}'"),
            }),
        }
    }
}

impl TryFrom<String> for DayInterval {
    type Error = SchedulerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DayInterval> for String {
    fn from(value: DayInterval) -> Self {
        value.to_string()
    }
}

// ============================================================================
// Recurrence Descriptor
// ============================================================================

/// When one job fires: a day interval plus a time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceDescriptor {
    /// Day-of-month step
    pub day_interval: DayInterval,

    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl Default for RecurrenceDescriptor {
    fn default() -> Self {
        Self::daily_at(TimeOfDay::MIDNIGHT)
    }
}

impl RecurrenceDescriptor {
    /// Every day at the given time
    pub fn daily_at(time: TimeOfDay) -> Self {
        Self {
            day_interval: DayInterval::EveryDay,
            hour: time.hour,
            minute: time.minute,
            second: time.second,
        }
    }

    /// Time-of-day part
    pub fn time(&self) -> TimeOfDay {
        TimeOfDay {
            hour: self.hour,
            minute: self.minute,
            second: self.second,
        }
    }

    fn set_time(&mut self, time: TimeOfDay) {
        self.hour = time.hour;
        self.minute = time.minute;
        self.second = time.second;
    }
}

impl fmt::Display for RecurrenceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cron[day='{}', hour='{}', minute='{}', second='{}']",
            self.day_interval, self.hour, self.minute, self.second
        )
    }
}

// ============================================================================
// Schedule Store
// ============================================================================

/// In-memory table of recurrence descriptors keyed by job id
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    /// Where [`ScheduleStore::persist`] writes
    path: PathBuf,

    entries: BTreeMap<JobId, RecurrenceDescriptor>,
}

impl ScheduleStore {
    /// Create an empty store that persists to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Restore the store from `path`; a missing file yields an empty store
    pub fn load(path: impl Into<PathBuf>) -> SchedulerResult<Self> {
        let path = path.into();
        let entries = read_json_opt::<BTreeMap<JobId, RecurrenceDescriptor>>(&path)
            .map_err(|e| SchedulerError::persistence("load_schedule", &path, e))?
            .unwrap_or_default();

        tracing::debug!(path = %path.display(), entries = entries.len(), "Schedule store loaded");
        Ok(Self { path, entries })
    }

    /// Wrap into the shared handle
    pub fn into_shared(self) -> SharedScheduleStore {
        Arc::new(RwLock::new(self))
    }

    /// Persistence target
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, job_id: &str) -> Option<RecurrenceDescriptor> {
        self.entries.get(job_id).copied()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all rows in job id order
    pub fn iter(&self) -> impl Iterator<Item = (&JobId, &RecurrenceDescriptor)> {
        self.entries.iter()
    }

    /// Set the day interval of one job, creating `(*, 00:00:00)` if absent
    pub fn upsert_day_interval(&mut self, job_id: &str, day_interval: DayInterval) {
        self.entries
            .entry(job_id.to_string())
            .or_default()
            .day_interval = day_interval;
    }

    /// Set the time of day of one job, creating an every-day row if absent
    pub fn upsert_time(&mut self, job_id: &str, time: TimeOfDay) {
        self.entries
            .entry(job_id.to_string())
            .or_default()
            .set_time(time);
    }

    /// Drop a job from the table
    pub fn remove(&mut self, job_id: &str) -> Option<RecurrenceDescriptor> {
        self.entries.remove(job_id)
    }

    /// Re-spread every job over the day.
    ///
    /// Time fields of all `job_ids` are rewritten from the slot allocator in
    /// the given order; existing day intervals are kept. Rows whose id is not
    /// in `job_ids` are dropped. Returns the ids that were dropped.
    pub fn full_recompute(&mut self, job_ids: &[JobId], grace_minutes: u32) -> Vec<JobId> {
        let mut stale: Vec<JobId> = self
            .entries
            .keys()
            .filter(|id| !job_ids.contains(id))
            .cloned()
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale.sort();

        for (job_id, time) in allocate_slots(job_ids.iter(), grace_minutes) {
            self.upsert_time(job_id, time);
        }

        tracing::debug!(
            jobs = job_ids.len(),
            dropped = stale.len(),
            grace_minutes,
            "Schedule recomputed"
        );
        stale
    }

    /// Write the whole table to disk, replacing the previous version atomically.
    ///
    /// A failure leaves the in-memory table untouched; the next successful
    /// call includes every change made in between.
    pub fn persist(&self) -> SchedulerResult<PathBuf> {
        write_json_atomic(&self.path, &self.entries)
            .map_err(|e| SchedulerError::persistence("persist_schedule", &self.path, e))?;

        tracing::debug!(path = %self.path.display(), entries = self.entries.len(), "Schedule persisted");
        Ok(self.path.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<JobId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_day_interval_parse_and_display() {
        assert_eq!("*".parse::<DayInterval>().unwrap(), DayInterval::EveryDay);
        assert_eq!("*/3".parse::<DayInterval>().unwrap(), DayInterval::EveryNDays(3));
        assert_eq!("*/1".parse::<DayInterval>().unwrap(), DayInterval::EveryDay);
        assert!("*/0".parse::<DayInterval>().is_err());
        assert!("sometimes".parse::<DayInterval>().is_err());

        assert_eq!(DayInterval::every(4).to_string(), "*/4");
        assert_eq!(DayInterval::every(1).to_string(), "*");
    }

    #[test]
    fn test_day_interval_matches_day() {
        let every_three = DayInterval::every(3);
        assert!(every_three.matches_day(1));
        assert!(!every_three.matches_day(2));
        assert!(every_three.matches_day(4));
        assert!(every_three.matches_day(31));
        assert!(DayInterval::EveryDay.matches_day(17));
    }

    #[test]
    fn test_upsert_day_interval_creates_row() {
        let mut store = ScheduleStore::new("unused.json");
        store.upsert_day_interval("job", DayInterval::every(5));

        let row = store.get("job").unwrap();
        assert_eq!(row.day_interval, DayInterval::EveryNDays(5));
        assert_eq!(row.time(), TimeOfDay::MIDNIGHT);
    }

    #[test]
    fn test_upsert_time_keeps_interval() {
        let mut store = ScheduleStore::new("unused.json");
        store.upsert_day_interval("job", DayInterval::every(2));
        store.upsert_time("job", TimeOfDay::new(9, 15, 0).unwrap());

        let row = store.get("job").unwrap();
        assert_eq!(row.day_interval, DayInterval::EveryNDays(2));
        assert_eq!(row.time(), TimeOfDay::new(9, 15, 0).unwrap());
    }

    #[test]
    fn test_upsert_time_creates_every_day_row() {
        let mut store = ScheduleStore::new("unused.json");
        store.upsert_time("fresh", TimeOfDay::new(3, 0, 0).unwrap());
        assert_eq!(store.get("fresh").unwrap().day_interval, DayInterval::EveryDay);
    }

    #[test]
    fn test_full_recompute_three_jobs() {
        let mut store = ScheduleStore::new("unused.json");
        store.full_recompute(&ids(&["A", "B", "C"]), 30);

        assert_eq!(store.get("A").unwrap().time().to_string(), "00:30:00");
        assert_eq!(store.get("B").unwrap().time().to_string(), "08:00:00");
        assert_eq!(store.get("C").unwrap().time().to_string(), "16:00:00");
    }

    #[test]
    fn test_full_recompute_is_idempotent() {
        let job_ids = ids(&["m1", "m2", "m3", "m4", "m5"]);
        let mut store = ScheduleStore::new("unused.json");

        store.full_recompute(&job_ids, 30);
        let first: Vec<_> = store.iter().map(|(k, v)| (k.clone(), *v)).collect();
        store.full_recompute(&job_ids, 30);
        let second: Vec<_> = store.iter().map(|(k, v)| (k.clone(), *v)).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_full_recompute_keeps_day_interval_and_drops_stale() {
        let mut store = ScheduleStore::new("unused.json");
        store.upsert_day_interval("A", DayInterval::every(7));
        store.upsert_day_interval("gone", DayInterval::every(2));

        let dropped = store.full_recompute(&ids(&["A", "B"]), 30);

        assert_eq!(dropped, ids(&["gone"]));
        assert_eq!(store.get("A").unwrap().day_interval, DayInterval::EveryNDays(7));
        assert_eq!(store.get("B").unwrap().day_interval, DayInterval::EveryDay);
        assert!(!store.contains("gone"));
        assert_eq!(store.get("B").unwrap().time().to_string(), "12:00:00");
    }

    #[test]
    fn test_persist_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("scheduling").join("schedule.json");

        let mut store = ScheduleStore::new(&path);
        store.full_recompute(&ids(&["A", "B", "C"]), 30);
        store.upsert_day_interval("B", DayInterval::every(3));
        let written = store.persist().unwrap();
        assert_eq!(written, path);

        let loaded = ScheduleStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get("B"), store.get("B"));
        assert_eq!(loaded.get("A").unwrap().time().to_string(), "00:30:00");
    }

    #[test]
    fn test_persisted_format_is_keyed_by_job_id() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("schedule.json");

        let mut store = ScheduleStore::new(&path);
        store.upsert_day_interval("comment_crawl_1", DayInterval::every(2));
        store.persist().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["comment_crawl_1"]["day_interval"], "*/2");
        assert_eq!(raw["comment_crawl_1"]["hour"], 0);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::load(temp_dir.path().join("none.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_failure_keeps_memory_state() {
        let temp_dir = tempfile::tempdir().unwrap();
        // A directory squatting on the target path makes the rename fail.
        let path = temp_dir.path().join("blocked");
        std::fs::create_dir_all(path.join("child")).unwrap();

        let mut store = ScheduleStore::new(&path);
        store.upsert_day_interval("A", DayInterval::every(4));

        let err = store.persist().unwrap_err();
        assert!(matches!(err, SchedulerError::Persistence { .. }));
        assert_eq!(store.get("A").unwrap().day_interval, DayInterval::EveryNDays(4));
    }

    #[test]
    fn test_descriptor_display() {
        let mut row = RecurrenceDescriptor::daily_at(TimeOfDay::new(8, 0, 0).unwrap());
        row.day_interval = DayInterval::every(3);
        assert_eq!(
            row.to_string(),
            "cron[day='*/3', hour='8', minute='0', second='0']"
        );
    }
}
