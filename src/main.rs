use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinetrack::config::Config;
use cinetrack::error::{CinetrackErrorTrait, Error};

mod commands;

#[derive(Parser)]
#[command(
    name = "cinetrack",
    version,
    about = "Movie review crawler with adaptive per-title scheduling",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and run until Ctrl-C
    Run,

    /// Print the comment crawl schedule without changing it
    Plan,

    /// Fold crawled comment pages into daily and merged files
    Preprocess {
        /// Catch up every crawled day that has not been preprocessed
        #[arg(long, default_value = "false")]
        all: bool,

        /// Day to preprocess (YYYY-MM-DD), defaults to yesterday
        #[arg(long, conflicts_with = "all")]
        date: Option<NaiveDate>,
    },

    /// Run one comment crawl cycle for a movie
    CrawlComments {
        /// Movie id from the movie list
        movie_id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    tracing::info!("cinetrack starting");

    let result = match cli.command {
        Commands::Run => {
            tracing::info!("Starting run command");
            commands::run(config).await
        }

        Commands::Plan => {
            tracing::info!("Starting plan command");
            commands::plan(config).await
        }

        Commands::Preprocess { all, date } => {
            tracing::info!(all = %all, date = ?date, "Starting preprocess command");
            commands::preprocess(config, all, date).await
        }

        Commands::CrawlComments { movie_id } => {
            tracing::info!(movie_id = %movie_id, "Starting crawl-comments command");
            commands::crawl_comments(config, movie_id).await
        }
    };

    if let Err(e) = &result {
        if let Some(err) = e.downcast_ref::<Error>() {
            tracing::error!(
                category = err.category().as_str(),
                recoverable = err.is_recoverable(),
                error = %err,
                "Command failed"
            );
        }
        return result;
    }

    tracing::info!("cinetrack completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("cinetrack=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new(format!("cinetrack={level},warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
