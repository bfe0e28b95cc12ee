//! Adaptive crawl scheduling
//!
//! Comment crawl jobs are spread evenly over the day and each job's
//! day-of-month interval adapts to how fast its title gains comments.
//!
//! # Overview
//!
//! - **Interval calculation**: comment-count delta to a clamped day interval
//! - **Slot allocation**: evenly spaced times of day, kept clear of the
//!   window around midnight where the daily maintenance job runs
//! - **Schedule store**: recurrence descriptor per job id, persisted on change
//! - **Job registry**: live timers reconciled against the store
//! - **Feedback**: crawl results flowing back into the store and registry
//!
//! # Architecture
//!
//! ```text
//!  comment crawl ──FeedbackSample──▶ FeedbackLoop
//!                                       │ interval
//!                                       ▼
//!  daily maintenance ──full_recompute──▶ ScheduleStore ──persist──▶ schedule file
//!                                       │
//!                                       │ reconcile
//!                                       ▼
//!                                  JobRegistry ──fire──▶ JobHandler
//! ```
//!
//! # Modules
//!
//! - [`interval`] - Day interval from comment growth
//! - [`slots`] - Time-of-day slot allocation
//! - [`schedule`] - Recurrence descriptors and the schedule store
//! - [`trigger`] - Cron-style next-fire computation and jitter
//! - [`registry`] - Job registry, executor pools and reconciliation
//! - [`feedback`] - Feedback samples and the update loop
//! - [`error`] - Error types
//!
//! # Quick Start
//!
//! ```
//! use cinetrack::scheduler::{IntervalPolicy, ScheduleStore, DayInterval};
//!
//! let mut store = ScheduleStore::new("scheduling/comment_crawl_schedule.json");
//! let ids = vec!["comment_crawl_1".to_string(), "comment_crawl_2".to_string()];
//! store.full_recompute(&ids, 30);
//!
//! let days = IntervalPolicy::default().compute_or_max(500, 1500);
//! store.upsert_day_interval("comment_crawl_1", DayInterval::every(days));
//!
//! assert_eq!(store.get("comment_crawl_2").unwrap().time().to_string(), "12:00:00");
//! ```

pub mod error;
pub mod feedback;
pub mod interval;
pub mod registry;
pub mod schedule;
pub mod slots;
pub mod trigger;

pub use error::{SchedulerError, SchedulerResult};
pub use feedback::{FeedbackLoop, FeedbackSample, FeedbackSender};
pub use interval::{compute_interval, IntervalPolicy};
pub use registry::{
    ExecutorKind, ExecutorPools, JobArgs, JobBinding, JobHandler, JobKind, JobRegistry,
    JobResolver, JobSnapshot, JobSpec, ReconcileReport, RegisterOutcome,
};
pub use schedule::{
    DayInterval, JobId, RecurrenceDescriptor, ScheduleStore, SharedScheduleStore,
};
pub use slots::{allocate_slots, TimeOfDay};
pub use trigger::CronTrigger;
