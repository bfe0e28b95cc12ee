//! Page fetching with rate limiting
//!
//! [`PageFetcher`] is the seam between the crawl orchestrators and the
//! review site. [`HttpPageFetcher`] implements it over HTTP with:
//! - Rate limiting with governor
//! - Retry with exponential backoff for transient statuses
//! - Base URL overrides for testing with mock servers

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT},
    Client, StatusCode,
};
use std::num::NonZeroU32;
use std::time::Duration;

use super::comment::{parse_comment_page, CommentPage};
use super::info::{parse_info_page, MovieInfo};
use crate::config::CrawlerConfig;
use crate::utils::error::FetchError;

/// Source of comment and movie pages
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// One page of comments starting at `start_index`.
    ///
    /// The total comment count is only read from the first page.
    async fn fetch_comments(&self, movie_id: u64, start_index: u64)
        -> Result<CommentPage, FetchError>;

    /// Movie details and aggregate rating; details are skipped when `rating_only`
    async fn fetch_info(&self, movie_id: u64, rating_only: bool) -> Result<MovieInfo, FetchError>;
}

/// HTTP implementation of [`PageFetcher`]
pub struct HttpPageFetcher {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Site serving comment pages
    comment_base_url: String,

    /// Site serving movie pages
    info_base_url: String,

    user_agent: String,

    /// Maximum number of retry attempts for failed requests
    max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    base_delay_ms: u64,
}

impl HttpPageFetcher {
    /// Create a fetcher from crawler configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .cookie_store(config.enable_cookies)
            .build()?;

        let per_second = config.rate_limit.ceil().max(1.0) as u32;
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            comment_base_url: config.comment_base_url.trim_end_matches('/').to_string(),
            info_base_url: config.info_base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            max_retries: 2,
            base_delay_ms: 1000,
        })
    }

    /// Point both sites at `base_url`, for mock servers
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        self.comment_base_url = base.clone();
        self.info_base_url = base;
        self
    }

    /// Override retry behaviour
    pub fn with_retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Comment page URL
    pub fn comment_url(&self, movie_id: u64, start_index: u64) -> String {
        format!(
            "{}/movie/subject/{movie_id}/comments?sort=new_score&start={start_index}",
            self.comment_base_url
        )
    }

    /// Movie page URL
    pub fn info_url(&self, movie_id: u64) -> String {
        format!("{}/subject/{movie_id}", self.info_base_url)
    }

    /// Fetch a page body with rate limiting and retries
    pub async fn fetch_text(&self, url: &str, referer: &str) -> Result<String, FetchError> {
        self.rate_limiter.until_ready().await;

        let mut last_error = FetchError::Timeout;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay_ms * 2_u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            tracing::debug!(url = %url, attempt, "Fetching page");

            match self.client.get(url).headers(self.build_headers(referer)).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }
                    let error = Self::status_error(status, url);
                    if !Self::should_retry(status.as_u16()) {
                        return Err(error);
                    }
                    last_error = error;
                }
                Err(e) if e.is_timeout() => last_error = FetchError::Timeout,
                Err(e) => last_error = FetchError::Http(e),
            }
        }

        tracing::warn!(url = %url, retries = self.max_retries, error = %last_error, "Retries exhausted");
        Err(last_error)
    }

    fn status_error(status: StatusCode, url: &str) -> FetchError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimit,
            StatusCode::NOT_FOUND => FetchError::NotFound(url.to_string()),
            _ => FetchError::ServerError(status.as_u16()),
        }
    }

    /// Retry on 429 and the transient 5xx statuses
    fn should_retry(status: u16) -> bool {
        matches!(status, 429 | 500 | 502 | 503 | 504)
    }

    fn build_headers(&self, referer: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(agent) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        if let Ok(referer_value) = HeaderValue::from_str(referer) {
            headers.insert(REFERER, referer_value);
        }

        headers
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_comments(
        &self,
        movie_id: u64,
        start_index: u64,
    ) -> Result<CommentPage, FetchError> {
        let url = self.comment_url(movie_id, start_index);
        let html = self.fetch_text(&url, &self.comment_base_url).await?;
        parse_comment_page(&html, movie_id, &url, start_index == 0)
    }

    async fn fetch_info(&self, movie_id: u64, rating_only: bool) -> Result<MovieInfo, FetchError> {
        let url = self.info_url(movie_id);
        let html = self.fetch_text(&url, &self.info_base_url).await?;
        parse_info_page(&html, movie_id, &url, &self.info_base_url, rating_only)
    }
}
