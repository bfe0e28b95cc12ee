//! cinetrack - Adaptive movie review crawler
//!
//! Tracks a list of movies and crawls their user comments on a schedule that
//! adapts to how fast each title gains comments.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`scheduler`] - Interval calculation, slot allocation, schedule store and job registry
//! - [`movies`] - The tracked movie list
//! - [`crawler`] - Comment and movie page crawling with rate limiting
//! - [`preprocess`] - Daily and merged comment files
//! - [`dispatch`] - Job handlers and runtime bootstrap
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use cinetrack::config::Config;
//! use cinetrack::dispatch::Service;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let service = Service::start(config).await?;
//!     service.run_until_ctrl_c().await
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod dispatch;
pub mod error;
pub mod movies;
pub mod preprocess;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{HttpPageFetcher, PageFetcher};
    pub use crate::dispatch::{AppContext, DispatchTable, Service};
    pub use crate::error::{CinetrackErrorTrait, Error, ErrorCategory, Result};
    pub use crate::movies::{MovieList, MovieRecord};
    pub use crate::scheduler::{
        DayInterval, FeedbackSample, IntervalPolicy, JobRegistry, ScheduleStore,
    };
}
