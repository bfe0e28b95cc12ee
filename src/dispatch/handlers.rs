//! Job handlers
//!
//! Each handler adapts one piece of work to the [`JobHandler`] interface the
//! registry fires. Failures are returned to the registry, which logs them
//! with the job id; nothing here retries. The crawl and preprocess steps
//! report the crate [`Error`] so their failures carry a category.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use std::sync::Weak;

use super::{AppContext, DispatchTable};
use crate::error::{CinetrackErrorTrait, Error};
use crate::crawler::{
    comment_job_id, movie_id_from_job_id, CommentCrawlOutcome, CommentCrawler, MovieInfoCrawler,
};
use crate::movies::SharedMovieList;
use crate::preprocess::{PreprocessReport, Preprocessor};
use crate::scheduler::{
    FeedbackSample, FeedbackSender, JobArgs, JobHandler, JobId, JobKind, ReconcileReport,
};

// ============================================================================
// Comment Crawl
// ============================================================================

/// Crawls one movie's comments and reports the growth
pub struct CommentCrawlJob {
    crawler: CommentCrawler,
    movies: SharedMovieList,
    feedback_tx: FeedbackSender,
}

impl CommentCrawlJob {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            crawler: CommentCrawler::from_config(ctx.fetcher.clone(), &ctx.config),
            movies: ctx.movies.clone(),
            feedback_tx: ctx.feedback_tx.clone(),
        }
    }

    /// Run one crawl cycle.
    ///
    /// On success the movie list gets the new total and a feedback sample
    /// comparing it with `previous_count` is sent. A failed cycle sends
    /// nothing, so the interval stays as it is.
    pub async fn crawl(&self, job_id: &str, args: &JobArgs) -> crate::Result<CommentCrawlOutcome> {
        let movie_id = args
            .movie_id
            .or_else(|| movie_id_from_job_id(job_id))
            .ok_or_else(|| Error::config(format!("job {job_id} has no movie id")))?;

        let previous_count = match args.previous_count {
            Some(count) => count,
            None => self
                .movies
                .read()
                .await
                .get(movie_id)
                .map(|r| r.last_crawl_total_comment_count)
                .unwrap_or_default(),
        };

        let outcome = self.crawler.crawl(movie_id).await?;

        if let Err(e) = self
            .movies
            .write()
            .await
            .update_total_comment_count(movie_id, outcome.total_count)
        {
            tracing::error!(job_id = %job_id, movie_id, operation = "update_total_comment_count", error = %e, "Movie list not updated");
        }

        let sample = FeedbackSample::new(job_id, previous_count, outcome.total_count);
        if self.feedback_tx.send(sample).await.is_err() {
            tracing::warn!(job_id = %job_id, "Feedback loop closed, interval not updated");
        }

        Ok(outcome)
    }
}

#[async_trait]
impl JobHandler for CommentCrawlJob {
    async fn run(&self, job_id: &str, args: &JobArgs) -> Result<()> {
        match self.crawl(job_id, args).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    category = e.category().as_str(),
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "Comment crawl abandoned"
                );
                Err(e.into())
            }
        }
    }
}

// ============================================================================
// Movie Info Crawl
// ============================================================================

/// Refreshes movie pages and rating history for the whole list
pub struct MovieInfoCrawlJob {
    crawler: MovieInfoCrawler,
    movies: SharedMovieList,
}

impl MovieInfoCrawlJob {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            crawler: MovieInfoCrawler::new(ctx.fetcher.clone(), ctx.config.storage.movie_info_dir()),
            movies: ctx.movies.clone(),
        }
    }
}

#[async_trait]
impl JobHandler for MovieInfoCrawlJob {
    async fn run(&self, _job_id: &str, _args: &JobArgs) -> Result<()> {
        self.crawler.crawl_all(&self.movies).await;
        Ok(())
    }
}

// ============================================================================
// Preprocess
// ============================================================================

/// Folds crawled comment pages into daily and merged files
pub struct PreprocessJob {
    preprocessor: Preprocessor,
    movies: SharedMovieList,
}

impl PreprocessJob {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            preprocessor: Preprocessor::from_config(&ctx.config.storage),
            movies: ctx.movies.clone(),
        }
    }

    /// Preprocess one day for every movie
    pub async fn run_for_date(&self, date: NaiveDate) -> crate::Result<PreprocessReport> {
        let movie_ids = self.movies.read().await.movie_ids();
        let preprocessor = self.preprocessor.clone();
        tokio::task::spawn_blocking(move || preprocessor.run_for_date(&movie_ids, date))
            .await
            .map_err(|e| Error::with_source("preprocess task panicked", e))
    }

    /// Catch up every crawled day that has not been preprocessed
    pub async fn run_all(&self) -> crate::Result<PreprocessReport> {
        let movie_ids = self.movies.read().await.movie_ids();
        let preprocessor = self.preprocessor.clone();
        tokio::task::spawn_blocking(move || preprocessor.run_all(&movie_ids))
            .await
            .map_err(|e| Error::with_source("preprocess task panicked", e))
    }
}

#[async_trait]
impl JobHandler for PreprocessJob {
    async fn run(&self, _job_id: &str, _args: &JobArgs) -> Result<()> {
        let yesterday = Local::now()
            .date_naive()
            .checked_sub_days(Days::new(1))
            .context("date out of range")?;
        self.run_for_date(yesterday).await?;
        Ok(())
    }
}

// ============================================================================
// Daily Maintenance
// ============================================================================

/// What one maintenance cycle changed
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub movies_added: usize,
    pub comment_jobs: usize,
    pub dropped: Vec<JobId>,
    pub reconcile: Option<ReconcileReport>,
}

/// Applies movie list updates and re-spreads the comment crawl jobs
pub struct DailyMaintenanceJob {
    ctx: AppContext,
    table: Weak<DispatchTable>,
}

impl DailyMaintenanceJob {
    pub fn new(ctx: AppContext, table: Weak<DispatchTable>) -> Self {
        Self { ctx, table }
    }

    /// Run one maintenance cycle.
    ///
    /// Steps, in order: merge the operator update file into the movie list,
    /// recompute every comment crawl slot in list order, persist the store
    /// and, when `reconcile` is set, make the registry match it. An update
    /// file that cannot be applied is logged and the cycle continues with
    /// the current list.
    pub async fn run_cycle(&self, reconcile: bool) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        let job_ids: Vec<JobId> = {
            let mut movies = self.ctx.movies.write().await;
            match movies.apply_updates() {
                Ok(added) => report.movies_added = added,
                Err(e) => tracing::error!(operation = "apply_updates", error = %e, "Movie list update failed"),
            }
            movies.movie_ids().into_iter().map(comment_job_id).collect()
        };
        report.comment_jobs = job_ids.len();

        {
            let mut store = self.ctx.store.write().await;
            report.dropped = store.full_recompute(&job_ids, self.ctx.config.scheduler.grace_minutes);
            if let Err(e) = store.persist() {
                tracing::error!(operation = "persist_schedule", error = %e, "Schedule not persisted");
            }
        }

        if reconcile {
            let table = self
                .table
                .upgrade()
                .context("dispatch table dropped before maintenance")?;
            let store = self.ctx.store.read().await;
            report.reconcile = Some(
                self.ctx
                    .registry
                    .reconcile(&store, table.as_ref(), JobKind::CommentCrawl)
                    .await,
            );
        }

        tracing::info!(
            movies_added = report.movies_added,
            comment_jobs = report.comment_jobs,
            dropped = report.dropped.len(),
            reconciled = reconcile,
            "Daily maintenance finished"
        );
        Ok(report)
    }
}

#[async_trait]
impl JobHandler for DailyMaintenanceJob {
    async fn run(&self, _job_id: &str, _args: &JobArgs) -> Result<()> {
        self.run_cycle(true).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StorageConfig};
    use crate::crawler::{CommentPage, MovieInfo, PageFetcher};
    use crate::error::ErrorCategory;
    use crate::movies::{MovieList, MovieRecord};
    use crate::scheduler::{ExecutorPools, JobRegistry, ScheduleStore};
    use crate::utils::error::FetchError;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct TimeoutFetcher;

    #[async_trait]
    impl PageFetcher for TimeoutFetcher {
        async fn fetch_comments(&self, _movie_id: u64, _start: u64) -> Result<CommentPage, FetchError> {
            Err(FetchError::Timeout)
        }

        async fn fetch_info(&self, _movie_id: u64, _rating_only: bool) -> Result<MovieInfo, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    fn context(root: &std::path::Path) -> (AppContext, mpsc::Receiver<FeedbackSample>) {
        let mut config = Config::default();
        config.storage = StorageConfig::rooted_at(root);
        config.crawler.page_pause_secs = 0;

        let movies = MovieList::new(
            config.storage.movie_list_file(),
            config.storage.movie_list_update_file(),
        )
        .with_records(vec![MovieRecord::new(3)])
        .into_shared();
        let (feedback_tx, feedback_rx) = mpsc::channel(4);

        let ctx = AppContext {
            store: ScheduleStore::new(config.storage.schedule_file()).into_shared(),
            config: Arc::new(config),
            movies,
            registry: Arc::new(JobRegistry::new(ExecutorPools::default(), 0)),
            fetcher: Arc::new(TimeoutFetcher),
            feedback_tx,
        };
        (ctx, feedback_rx)
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recoverable_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut feedback_rx) = context(dir.path());

        let err = CommentCrawlJob::new(&ctx)
            .crawl("comment_crawl_3", &JobArgs::comment_crawl(3, 0))
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.is_recoverable());
        assert!(feedback_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_job_without_movie_id_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _feedback_rx) = context(dir.path());

        let err = CommentCrawlJob::new(&ctx)
            .crawl("not_a_comment_job", &JobArgs::default())
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_handler_failure_reaches_registry_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _feedback_rx) = context(dir.path());

        let result = CommentCrawlJob::new(&ctx)
            .run("comment_crawl_3", &JobArgs::comment_crawl(3, 0))
            .await;

        let err = result.unwrap_err();
        assert!(err.downcast_ref::<Error>().is_some());
    }
}
