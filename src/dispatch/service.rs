//! Runtime bootstrap
//!
//! Startup order:
//! 1. load the movie list (fatal when missing) and the schedule store;
//! 2. start the feedback loop;
//! 3. run daily maintenance without reconciling, then catch up preprocessing;
//! 4. register every comment crawl job from the store and the fixed jobs.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::handlers::{DailyMaintenanceJob, MaintenanceReport, PreprocessJob};
use super::{AppContext, DispatchTable};
use crate::config::Config;
use crate::crawler::{HttpPageFetcher, PageFetcher};
use crate::movies::MovieList;
use crate::scheduler::{
    ExecutorPools, FeedbackLoop, JobKind, JobRegistry, JobResolver, ScheduleStore,
};

/// Capacity of the feedback channel
const FEEDBACK_CHANNEL_SIZE: usize = 1024;

/// Running scheduler with all of its jobs registered
pub struct Service {
    ctx: AppContext,
    table: Arc<DispatchTable>,
    shutdown_tx: watch::Sender<bool>,
    feedback_task: JoinHandle<()>,
}

impl Service {
    /// Start with the HTTP fetcher built from configuration
    pub async fn start(config: Config) -> Result<Self> {
        let fetcher = HttpPageFetcher::from_config(&config.crawler)
            .context("Failed to create HTTP fetcher")?;
        Self::start_with_fetcher(config, Arc::new(fetcher)).await
    }

    /// Start with the given page fetcher
    pub async fn start_with_fetcher(config: Config, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let storage = &config.storage;

        let movies = MovieList::load(storage.movie_list_file(), storage.movie_list_update_file())
            .context("Failed to read movie list")?
            .into_shared();

        let schedule_path = storage.schedule_file();
        let store = ScheduleStore::load(&schedule_path)
            .unwrap_or_else(|e| {
                tracing::warn!(operation = "load_schedule", error = %e, "Starting with an empty schedule");
                ScheduleStore::new(&schedule_path)
            })
            .into_shared();

        let registry = Arc::new(
            JobRegistry::new(
                ExecutorPools::new(
                    config.scheduler.default_pool_size,
                    config.scheduler.heavy_pool_size,
                ),
                config.scheduler.jitter_secs,
            )
            .with_snapshot_path(storage.job_snapshot_file()),
        );

        let (feedback_tx, feedback_rx) = mpsc::channel(FEEDBACK_CHANNEL_SIZE);
        let policy = config.scheduler.interval_policy();

        let ctx = AppContext {
            config: Arc::new(config),
            movies,
            store: store.clone(),
            registry: registry.clone(),
            fetcher,
            feedback_tx,
        };
        let table = DispatchTable::build(&ctx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let resolver: Arc<dyn JobResolver> = table.clone();
        let feedback = FeedbackLoop::new(store, policy).with_registry(registry, resolver);
        let feedback_task = tokio::spawn(feedback.run(feedback_rx, shutdown_rx));

        let service = Self {
            ctx,
            table,
            shutdown_tx,
            feedback_task,
        };
        service.bootstrap().await?;
        Ok(service)
    }

    async fn bootstrap(&self) -> Result<MaintenanceReport> {
        let maintenance = DailyMaintenanceJob::new(self.ctx.clone(), Arc::downgrade(&self.table));
        let report = maintenance.run_cycle(false).await?;

        if let Err(e) = PreprocessJob::new(&self.ctx).run_all().await {
            tracing::error!(operation = "preprocess_all", error = %e, "Startup preprocessing failed");
        }

        {
            let store = self.ctx.store.read().await;
            self.ctx
                .registry
                .reconcile(&store, self.table.as_ref(), JobKind::CommentCrawl)
                .await;
        }
        self.table.register_fixed_jobs(&self.ctx.registry).await;

        tracing::info!(
            jobs = self.ctx.registry.len().await,
            movies = report.comment_jobs,
            "Scheduler started"
        );
        Ok(report)
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn dispatch_table(&self) -> &Arc<DispatchTable> {
        &self.table
    }

    /// Run until Ctrl-C, then shut down
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Shutdown requested");
        self.shutdown().await;
        Ok(())
    }

    /// Stop all timers and the feedback loop; in-flight runs finish on their own
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.ctx.registry.shutdown().await;
        if let Err(e) = self.feedback_task.await {
            tracing::warn!(error = %e, "Feedback loop ended abnormally");
        }
    }
}
