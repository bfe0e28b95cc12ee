use anyhow::Result;
use chrono::Local;

use cinetrack::config::Config;
use cinetrack::crawler::{comment_job_id, movie_id_from_job_id};
use cinetrack::scheduler::{CronTrigger, JobId};

use super::{load_movies, load_schedule};

/// Print the comment crawl schedule the next maintenance cycle would produce.
///
/// Nothing is written; stored day intervals are kept and times recomputed.
pub async fn plan(config: Config) -> Result<()> {
    let movies = load_movies(&config)?;
    let mut store = load_schedule(&config)?;

    let job_ids: Vec<JobId> = movies.movie_ids().into_iter().map(comment_job_id).collect();
    let dropped = store.full_recompute(&job_ids, config.scheduler.grace_minutes);

    println!("Comment crawl plan ({} jobs)", job_ids.len());
    println!("{:<28} {:>8} {:>10} {:>8}  next run", "job id", "interval", "time", "last");

    let now = Local::now();
    for job_id in &job_ids {
        let Some(descriptor) = store.get(job_id) else {
            continue;
        };
        let previous = movie_id_from_job_id(job_id)
            .and_then(|movie_id| movies.get(movie_id))
            .map(|r| r.last_crawl_total_comment_count)
            .unwrap_or_default();
        let next = CronTrigger::from_descriptor(&descriptor)
            .next_fire_after(&now)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<28} {:>8} {:>10} {:>8}  {}",
            job_id,
            descriptor.day_interval.to_string(),
            descriptor.time().to_string(),
            previous,
            next
        );
    }

    if !dropped.is_empty() {
        println!("\nNo longer scheduled: {}", dropped.join(", "));
    }
    Ok(())
}
