use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

use cinetrack::config::Config;
use cinetrack::crawler::{comment_job_id, HttpPageFetcher};
use cinetrack::dispatch::{AppContext, CommentCrawlJob};
use cinetrack::scheduler::{ExecutorPools, FeedbackLoop, JobArgs, JobRegistry};

use super::{load_movies, load_schedule};

/// Run one comment crawl cycle for `movie_id` and apply its feedback
pub async fn crawl_comments(config: Config, movie_id: u64) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let movies = load_movies(&config)?;
    let previous_count = movies
        .get(movie_id)
        .with_context(|| format!("Movie {movie_id} is not in the movie list"))?
        .last_crawl_total_comment_count;

    let store = load_schedule(&config)?.into_shared();
    let fetcher = HttpPageFetcher::from_config(&config.crawler)
        .context("Failed to create HTTP fetcher")?;
    let (feedback_tx, mut feedback_rx) = mpsc::channel(1);
    let policy = config.scheduler.interval_policy();

    let ctx = AppContext {
        config: Arc::new(config),
        movies: movies.into_shared(),
        store: store.clone(),
        registry: Arc::new(JobRegistry::new(ExecutorPools::default(), 0)),
        fetcher: Arc::new(fetcher),
        feedback_tx,
    };

    let job_id = comment_job_id(movie_id);
    println!("Crawling comments of movie {movie_id} (previous total {previous_count})");

    let outcome = CommentCrawlJob::new(&ctx)
        .crawl(&job_id, &JobArgs::comment_crawl(movie_id, previous_count))
        .await?;

    println!("  Pages:    {}", outcome.pages);
    println!("  Comments: {}", outcome.records);
    println!("  Total:    {}", outcome.total_count);

    if let Ok(sample) = feedback_rx.try_recv() {
        let interval = FeedbackLoop::new(store, policy).apply(&sample).await?;
        println!("  Interval: {interval}");
    }
    Ok(())
}
