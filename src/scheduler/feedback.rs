//! Comment-growth feedback
//!
//! Each completed comment crawl reports a [`FeedbackSample`]. The loop turns
//! it into a new day interval, writes it to the schedule store and replaces
//! the job's registration so the next fire uses the new interval and the
//! fresh comment count.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::error::SchedulerResult;
use super::interval::IntervalPolicy;
use super::registry::{JobRegistry, JobResolver, JobSpec};
use super::schedule::{DayInterval, JobId, SharedScheduleStore};
use super::trigger::CronTrigger;

/// Observed comment growth of one job between two crawls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackSample {
    pub job_id: JobId,
    pub previous_count: u64,
    pub current_count: u64,
}

impl FeedbackSample {
    pub fn new(job_id: impl Into<JobId>, previous_count: u64, current_count: u64) -> Self {
        Self {
            job_id: job_id.into(),
            previous_count,
            current_count,
        }
    }
}

/// Sending half handed to crawl orchestrators
pub type FeedbackSender = mpsc::Sender<FeedbackSample>;

/// Single consumer of feedback samples
pub struct FeedbackLoop {
    store: SharedScheduleStore,
    policy: IntervalPolicy,
    registry: Option<(Arc<JobRegistry>, Arc<dyn JobResolver>)>,
}

impl FeedbackLoop {
    /// Loop that only maintains the schedule store
    pub fn new(store: SharedScheduleStore, policy: IntervalPolicy) -> Self {
        Self {
            store,
            policy,
            registry: None,
        }
    }

    /// Also replace the job's registration after each update
    pub fn with_registry(mut self, registry: Arc<JobRegistry>, resolver: Arc<dyn JobResolver>) -> Self {
        self.registry = Some((registry, resolver));
        self
    }

    /// Apply one sample and return the interval now stored for the job.
    ///
    /// No growth (or a shrinking count) selects the slowest cadence. A
    /// persistence failure is logged; the in-memory store keeps the update.
    pub async fn apply(&self, sample: &FeedbackSample) -> SchedulerResult<DayInterval> {
        let days = match self.policy.compute(sample.previous_count, sample.current_count) {
            Ok(days) => days,
            Err(e) => {
                tracing::info!(
                    job_id = %sample.job_id,
                    previous = sample.previous_count,
                    current = sample.current_count,
                    reason = %e,
                    "No comment growth, using maximum interval"
                );
                self.policy.max_interval
            }
        };
        let day_interval = DayInterval::every(days);

        let descriptor = {
            let mut store = self.store.write().await;
            store.upsert_day_interval(&sample.job_id, day_interval);
            if let Err(e) = store.persist() {
                tracing::error!(job_id = %sample.job_id, operation = "persist_schedule", error = %e, "Schedule not persisted");
            }
            store.get(&sample.job_id)
        };

        tracing::info!(
            job_id = %sample.job_id,
            delta = sample.current_count as i64 - sample.previous_count as i64,
            day_interval = %day_interval,
            "Crawl interval updated"
        );

        if let (Some((registry, resolver)), Some(descriptor)) = (&self.registry, descriptor) {
            match resolver.resolve(&sample.job_id).await {
                Some(binding) => {
                    let trigger =
                        CronTrigger::from_descriptor(&descriptor).with_jitter(registry.jitter_secs());
                    if let Err(e) = registry
                        .register(JobSpec::new(sample.job_id.clone(), trigger, binding))
                        .await
                    {
                        tracing::error!(job_id = %sample.job_id, operation = "register", error = %e, "Registration not replaced");
                    }
                }
                None => {
                    tracing::warn!(job_id = %sample.job_id, "No dispatch entry, registration left unchanged");
                }
            }
        }

        Ok(day_interval)
    }

    /// Consume samples until the channel closes or shutdown is signalled
    pub async fn run(self, mut rx: mpsc::Receiver<FeedbackSample>, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Feedback loop started");
        loop {
            tokio::select! {
                sample = rx.recv() => {
                    let Some(sample) = sample else { break };
                    if let Err(e) = self.apply(&sample).await {
                        tracing::error!(job_id = %sample.job_id, error = %e, "Feedback not applied");
                    }
                }
                stopped = shutdown.changed() => {
                    if stopped.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Feedback loop stopped");
    }
}
