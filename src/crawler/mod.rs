//! Page crawling with rate limiting
//!
//! This module fetches comment pages and movie pages from the review site
//! and stores what they contain:
//! - [`fetcher`]: HTTP access behind the [`PageFetcher`] trait
//! - [`comment`]: paginated comment crawling
//! - [`info`]: movie information and rating history

// Helper macro to parse selectors that are known to be valid
macro_rules! parse_selector {
    ($s:expr) => {
        scraper::Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

pub mod comment;
pub mod fetcher;
pub mod info;

pub use comment::{
    comment_job_id, movie_id_from_job_id, CommentCrawlOutcome, CommentCrawler, CommentPage,
    CommentRecord,
};
pub use fetcher::{HttpPageFetcher, PageFetcher};
pub use info::{InfoCrawlOutcome, InfoCrawlReport, MovieDetails, MovieInfo, MovieInfoCrawler, RatingSummary};
