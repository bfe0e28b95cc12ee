use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDate};

use cinetrack::config::Config;
use cinetrack::preprocess::Preprocessor;

use super::load_movies;

pub async fn preprocess(config: Config, all: bool, date: Option<NaiveDate>) -> Result<()> {
    let movie_ids = load_movies(&config)?.movie_ids();
    let preprocessor = Preprocessor::from_config(&config.storage);

    let report = if all {
        println!("Preprocessing every pending day for {} movies", movie_ids.len());
        tokio::task::spawn_blocking(move || preprocessor.run_all(&movie_ids)).await?
    } else {
        let date = match date {
            Some(date) => date,
            None => Local::now()
                .date_naive()
                .checked_sub_days(Days::new(1))
                .context("date out of range")?,
        };
        println!("Preprocessing {date} for {} movies", movie_ids.len());
        tokio::task::spawn_blocking(move || preprocessor.run_for_date(&movie_ids, date)).await?
    };

    println!("  Combined: {}", report.combined);
    println!("  Merged:   {}", report.merged);
    println!("  Failed:   {}", report.failed);

    if report.failed > 0 {
        anyhow::bail!("{} preprocessing steps failed", report.failed);
    }
    Ok(())
}
