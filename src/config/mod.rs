//! Configuration management for cinetrack
//!
//! This module handles loading and validating configuration from environment variables,
//! files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::IntervalPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduling configuration
    pub scheduler: SchedulerConfig,

    /// Crawler configuration
    pub crawler: CrawlerConfig,

    /// Storage layout configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Largest accepted jitter bound
pub const MAX_JITTER_SECS: u64 = 3600;

/// Adaptive scheduling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Comment increment that justifies one crawl per day
    pub target_increment_per_day: u64,

    /// Shortest crawl interval in days
    pub min_interval: u32,

    /// Longest crawl interval in days
    pub max_interval: u32,

    /// Minutes after midnight and before the next midnight kept free of comment crawls
    pub grace_minutes: u32,

    /// Upper bound of the random delay added to each fire time
    pub jitter_secs: u64,

    /// Permits of the default executor pool
    pub default_pool_size: usize,

    /// Permits of the heavy executor pool
    pub heavy_pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_increment_per_day: 1000,
            min_interval: 1,
            max_interval: 10,
            grace_minutes: 30,
            jitter_secs: 10,
            default_pool_size: 500,
            heavy_pool_size: 50,
        }
    }
}

impl SchedulerConfig {
    /// Interval parameters as a policy value
    #[must_use]
    pub fn interval_policy(&self) -> IntervalPolicy {
        IntervalPolicy {
            target_increment_per_day: self.target_increment_per_day,
            min_interval: self.min_interval,
            max_interval: self.max_interval,
        }
    }
}

/// Crawler-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Base URL of the mobile site serving comment pages
    pub comment_base_url: String,

    /// Base URL of the desktop site serving movie pages
    pub info_base_url: String,

    /// Rate limit (requests per second)
    pub rate_limit: f64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Comments per page; the start index advances by this step
    pub page_size: u64,

    /// Pause between two comment pages in seconds
    pub page_pause_secs: u64,

    /// Safety cap on pages fetched in one crawl cycle
    pub max_pages: u64,

    /// User agent string
    pub user_agent: String,

    /// Enable cookie persistence
    pub enable_cookies: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            comment_base_url: String::from("https://m.douban.com"),
            info_base_url: String::from("https://movie.douban.com"),
            rate_limit: 2.0,
            request_timeout_secs: 30,
            page_size: 20,
            page_pause_secs: 3,
            max_pages: 5000,
            user_agent: String::from(
                "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Mobile Safari/537.36",
            ),
            enable_cookies: true,
        }
    }
}

/// Storage layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of crawled and preprocessed data
    pub data_dir: PathBuf,

    /// Directory holding the movie list and its update file
    pub movie_list_dir: PathBuf,

    /// Directory holding the schedule and job snapshot files
    pub scheduling_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            movie_list_dir: PathBuf::from("movie_list"),
            scheduling_dir: PathBuf::from("scheduling"),
        }
    }
}

impl StorageConfig {
    /// Same layout rooted at `root`
    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            movie_list_dir: root.join("movie_list"),
            scheduling_dir: root.join("scheduling"),
        }
    }

    pub fn movie_list_file(&self) -> PathBuf {
        self.movie_list_dir.join("movie_list.json")
    }

    pub fn movie_list_update_file(&self) -> PathBuf {
        self.movie_list_dir.join("movie_list_to_update.json")
    }

    pub fn schedule_file(&self) -> PathBuf {
        self.scheduling_dir.join("comment_crawl_schedule.json")
    }

    pub fn job_snapshot_file(&self) -> PathBuf {
        self.scheduling_dir.join("scheduled_jobs.json")
    }

    pub fn comment_crawled_dir(&self) -> PathBuf {
        self.data_dir.join("comment_data_crawled")
    }

    pub fn comment_daily_dir(&self) -> PathBuf {
        self.data_dir.join("comment_data_daily")
    }

    pub fn comment_merged_dir(&self) -> PathBuf {
        self.data_dir.join("comment_data_merged")
    }

    pub fn movie_info_dir(&self) -> PathBuf {
        self.data_dir.join("movie_info_data")
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let scheduler = SchedulerConfig {
            target_increment_per_day: env_parse("CINETRACK_TARGET_INCREMENT_PER_DAY")
                .unwrap_or(defaults.scheduler.target_increment_per_day),
            min_interval: env_parse("CINETRACK_MIN_INTERVAL")
                .unwrap_or(defaults.scheduler.min_interval),
            max_interval: env_parse("CINETRACK_MAX_INTERVAL")
                .unwrap_or(defaults.scheduler.max_interval),
            grace_minutes: env_parse("CINETRACK_GRACE_MINUTES")
                .unwrap_or(defaults.scheduler.grace_minutes),
            jitter_secs: env_parse("CINETRACK_JITTER_SECS")
                .unwrap_or(defaults.scheduler.jitter_secs),
            default_pool_size: env_parse("CINETRACK_DEFAULT_POOL_SIZE")
                .unwrap_or(defaults.scheduler.default_pool_size),
            heavy_pool_size: env_parse("CINETRACK_HEAVY_POOL_SIZE")
                .unwrap_or(defaults.scheduler.heavy_pool_size),
        };

        let crawler = CrawlerConfig {
            comment_base_url: std::env::var("CINETRACK_COMMENT_BASE_URL")
                .unwrap_or(defaults.crawler.comment_base_url),
            info_base_url: std::env::var("CINETRACK_INFO_BASE_URL")
                .unwrap_or(defaults.crawler.info_base_url),
            rate_limit: env_parse("CINETRACK_RATE_LIMIT").unwrap_or(defaults.crawler.rate_limit),
            request_timeout_secs: env_parse("CINETRACK_REQUEST_TIMEOUT")
                .unwrap_or(defaults.crawler.request_timeout_secs),
            page_size: env_parse("CINETRACK_PAGE_SIZE").unwrap_or(defaults.crawler.page_size),
            page_pause_secs: env_parse("CINETRACK_PAGE_PAUSE_SECS")
                .unwrap_or(defaults.crawler.page_pause_secs),
            max_pages: env_parse("CINETRACK_MAX_PAGES").unwrap_or(defaults.crawler.max_pages),
            user_agent: std::env::var("CINETRACK_USER_AGENT")
                .unwrap_or(defaults.crawler.user_agent),
            enable_cookies: true,
        };

        let storage = StorageConfig {
            data_dir: std::env::var("CINETRACK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.data_dir),
            movie_list_dir: std::env::var("CINETRACK_MOVIE_LIST_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.movie_list_dir),
            scheduling_dir: std::env::var("CINETRACK_SCHEDULING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.scheduling_dir),
        };

        let logging = LoggingConfig {
            level: std::env::var("CINETRACK_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("CINETRACK_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            scheduler,
            crawler,
            storage,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.scheduler
            .interval_policy()
            .validate()
            .context("Invalid interval policy")?;

        if self.scheduler.grace_minutes >= 60 {
            anyhow::bail!("grace_minutes must be below 60");
        }

        if self.scheduler.jitter_secs > MAX_JITTER_SECS {
            anyhow::bail!("jitter_secs must be at most {MAX_JITTER_SECS}");
        }

        if self.scheduler.default_pool_size == 0 || self.scheduler.heavy_pool_size == 0 {
            anyhow::bail!("executor pool sizes must be greater than 0");
        }

        if self.crawler.rate_limit <= 0.0 {
            anyhow::bail!("rate_limit must be positive");
        }

        if self.crawler.page_size == 0 {
            anyhow::bail!("page_size must be greater than 0");
        }

        url::Url::parse(&self.crawler.comment_base_url)
            .with_context(|| format!("Invalid comment_base_url: {}", self.crawler.comment_base_url))?;
        url::Url::parse(&self.crawler.info_base_url)
            .with_context(|| format!("Invalid info_base_url: {}", self.crawler.info_base_url))?;

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }

    /// Get the pause between comment pages as Duration
    #[must_use]
    pub fn page_pause(&self) -> Duration {
        Duration::from_secs(self.crawler.page_pause_secs)
    }
}
