//! Job dispatch
//!
//! Maps job ids to the handlers that run them. Four job kinds exist:
//! - `daily_routine_job`: movie list updates, slot recompute, reconcile
//! - `data_preprocess_job`: fold yesterday's crawled comments
//! - `movie_info_crawl_job`: refresh movie pages and ratings
//! - `comment_crawl_{movie_id}`: one adaptive comment crawl per title
//!
//! The first three are fixed daily jobs. Comment crawl jobs follow the
//! schedule store and are resolved with the movie's current comment count,
//! so each registration carries the count its next crawl compares against.

pub mod handlers;
pub mod service;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::config::Config;
use crate::crawler::{movie_id_from_job_id, PageFetcher};
use crate::movies::SharedMovieList;
use crate::scheduler::{
    CronTrigger, FeedbackSender, JobArgs, JobBinding, JobHandler, JobKind, JobRegistry,
    JobResolver, JobSpec, SharedScheduleStore, TimeOfDay,
};

pub use handlers::{
    CommentCrawlJob, DailyMaintenanceJob, MaintenanceReport, MovieInfoCrawlJob, PreprocessJob,
};
pub use service::Service;

pub const DAILY_MAINTENANCE_JOB_ID: &str = "daily_routine_job";
pub const PREPROCESS_JOB_ID: &str = "data_preprocess_job";
pub const MOVIE_INFO_JOB_ID: &str = "movie_info_crawl_job";

/// A job that fires once a day at a fixed time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedJob {
    pub id: &'static str,
    pub kind: JobKind,
    pub time: TimeOfDay,
}

/// Fixed daily jobs, in firing order
pub const FIXED_JOBS: [FixedJob; 3] = [
    FixedJob {
        id: DAILY_MAINTENANCE_JOB_ID,
        kind: JobKind::DailyMaintenance,
        time: TimeOfDay::MIDNIGHT,
    },
    FixedJob {
        id: PREPROCESS_JOB_ID,
        kind: JobKind::Preprocess,
        time: TimeOfDay {
            hour: 0,
            minute: 5,
            second: 0,
        },
    },
    FixedJob {
        id: MOVIE_INFO_JOB_ID,
        kind: JobKind::MovieInfoCrawl,
        time: TimeOfDay {
            hour: 0,
            minute: 10,
            second: 0,
        },
    },
];

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub movies: SharedMovieList,
    pub store: SharedScheduleStore,
    pub registry: Arc<JobRegistry>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub feedback_tx: FeedbackSender,
}

/// Job kind to handler mapping
pub struct DispatchTable {
    movies: SharedMovieList,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl DispatchTable {
    pub fn new(movies: SharedMovieList) -> Self {
        Self {
            movies,
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handler(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Table with the standard handler for every job kind
    pub fn build(ctx: &AppContext) -> Arc<Self> {
        Arc::new_cyclic(|table: &Weak<DispatchTable>| {
            Self::new(ctx.movies.clone())
                .with_handler(
                    JobKind::DailyMaintenance,
                    Arc::new(DailyMaintenanceJob::new(ctx.clone(), table.clone())),
                )
                .with_handler(JobKind::Preprocess, Arc::new(PreprocessJob::new(ctx)))
                .with_handler(JobKind::MovieInfoCrawl, Arc::new(MovieInfoCrawlJob::new(ctx)))
                .with_handler(JobKind::CommentCrawl, Arc::new(CommentCrawlJob::new(ctx)))
        })
    }

    fn binding(&self, kind: JobKind, args: JobArgs) -> Option<JobBinding> {
        let handler = self.handler(kind)?;
        Some(JobBinding {
            kind,
            handler,
            args,
            executor: kind.default_executor(),
        })
    }

    /// Register the fixed daily jobs
    pub async fn register_fixed_jobs(&self, registry: &JobRegistry) {
        for job in FIXED_JOBS {
            let Some(binding) = self.binding(job.kind, JobArgs::default()) else {
                tracing::error!(job_id = job.id, kind = %job.kind, "No handler for fixed job");
                continue;
            };
            let spec = JobSpec::new(job.id, CronTrigger::daily_at(job.time), binding);
            match registry.register(spec).await {
                Ok(outcome) => tracing::info!(job_id = job.id, at = %job.time, ?outcome, "Fixed job registered"),
                Err(e) => tracing::error!(job_id = job.id, operation = "register", error = %e, "Fixed job not registered"),
            }
        }
    }
}

#[async_trait]
impl JobResolver for DispatchTable {
    async fn resolve(&self, job_id: &str) -> Option<JobBinding> {
        if let Some(job) = FIXED_JOBS.iter().find(|job| job.id == job_id) {
            return self.binding(job.kind, JobArgs::default());
        }

        let movie_id = movie_id_from_job_id(job_id)?;
        let previous_count = self
            .movies
            .read()
            .await
            .get(movie_id)?
            .last_crawl_total_comment_count;
        self.binding(JobKind::CommentCrawl, JobArgs::comment_crawl(movie_id, previous_count))
    }
}
