//! Comment crawling
//!
//! Comments are read newest-scored first, one page at a time, until a page
//! comes back empty. Every non-empty page is stored as its own JSON file in
//! the crawled directory; the preprocessing pass later folds them into daily
//! and merged files.

use chrono::Local;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use super::fetcher::PageFetcher;
use crate::config::Config;
use crate::utils::error::{CrawlerError, FetchError};
use crate::utils::{normalize_whitespace, write_json_atomic};

static COMMENT_LIST: LazyLock<Selector> = LazyLock::new(|| parse_selector!("#comment-list ul"));
static COMMENT_ITEM: LazyLock<Selector> = LazyLock::new(|| parse_selector!("li"));
static TOTAL_TITLE: LazyLock<Selector> = LazyLock::new(|| parse_selector!("h1.title"));
static USER_LINK: LazyLock<Selector> = LazyLock::new(|| parse_selector!(".desc a"));
static USER_NAME: LazyLock<Selector> = LazyLock::new(|| parse_selector!(".desc .user-name"));
static RATING_STARS: LazyLock<Selector> = LazyLock::new(|| parse_selector!(".desc .rating-stars"));
static COMMENT_DATE: LazyLock<Selector> = LazyLock::new(|| parse_selector!(".desc .date"));
static COMMENT_TEXT: LazyLock<Selector> = LazyLock::new(|| parse_selector!(".comment-content p"));
static LIKE_COUNT: LazyLock<Selector> = LazyLock::new(|| parse_selector!(".btn-info .text"));

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("Invalid regex pattern"));

/// One user comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub movie_id: u64,
    pub user_url: String,
    pub user_name: String,

    /// Star rating from 1 to 5, absent when the user did not rate
    #[serde(default)]
    pub rating_stars: Option<u8>,

    /// Date text as shown on the page
    pub comment_timestamp: String,
    pub comment_content: String,

    #[serde(rename = "comment_like_ct", default)]
    pub comment_like_count: u64,
}

/// One page of comments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentPage {
    /// Total comment count, read from the first page only
    pub total_count: Option<u64>,
    pub records: Vec<CommentRecord>,
}

/// Job id of the comment crawl for a movie
pub fn comment_job_id(movie_id: u64) -> String {
    format!("comment_crawl_{movie_id}")
}

/// Movie id encoded in a comment crawl job id
pub fn movie_id_from_job_id(job_id: &str) -> Option<u64> {
    job_id.strip_prefix("comment_crawl_")?.parse().ok()
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Parse a comment page.
///
/// The comment list container must be present; an empty list is a valid
/// page and ends pagination. When `first_page` is set the page must also
/// carry the total comment count.
pub fn parse_comment_page(
    html: &str,
    movie_id: u64,
    url: &str,
    first_page: bool,
) -> Result<CommentPage, FetchError> {
    let document = Html::parse_document(html);

    let total_count = if first_page {
        let title = document
            .select(&TOTAL_TITLE)
            .next()
            .ok_or_else(|| FetchError::missing("h1.title", url))?;
        let text = element_text(title);
        let total = DIGITS
            .find(&text)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .ok_or_else(|| FetchError::Decode(format!("no comment total in '{text}'")))?;
        Some(total)
    } else {
        None
    };

    let list = document
        .select(&COMMENT_LIST)
        .next()
        .ok_or_else(|| FetchError::missing("#comment-list ul", url))?;

    let records = list
        .select(&COMMENT_ITEM)
        .map(|item| parse_comment_item(item, movie_id, url))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CommentPage {
        total_count,
        records,
    })
}

fn parse_comment_item(
    item: ElementRef<'_>,
    movie_id: u64,
    url: &str,
) -> Result<CommentRecord, FetchError> {
    let user_name = item
        .select(&USER_NAME)
        .next()
        .map(element_text)
        .ok_or_else(|| FetchError::missing(".user-name", url))?;

    let user_url = item
        .select(&USER_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .unwrap_or_default()
        .to_string();

    let rating_stars = item
        .select(&RATING_STARS)
        .next()
        .and_then(|stars| stars.value().attr("data-rating"))
        .and_then(|rating| rating.trim().parse::<u8>().ok());

    let comment_timestamp = item
        .select(&COMMENT_DATE)
        .next()
        .map(element_text)
        .ok_or_else(|| FetchError::missing(".date", url))?;

    let comment_content = item
        .select(&COMMENT_TEXT)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let comment_like_count = item
        .select(&LIKE_COUNT)
        .next()
        .map(element_text)
        .and_then(|text| DIGITS.find(&text).and_then(|m| m.as_str().parse().ok()))
        .unwrap_or(0);

    Ok(CommentRecord {
        movie_id,
        user_url,
        user_name,
        rating_stars,
        comment_timestamp,
        comment_content,
        comment_like_count,
    })
}

/// Result of one completed crawl cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCrawlOutcome {
    pub movie_id: u64,
    pub total_count: u64,
    pub pages: u64,
    pub records: usize,
    pub files: Vec<PathBuf>,
}

/// Paginating comment crawler
pub struct CommentCrawler {
    fetcher: Arc<dyn PageFetcher>,
    crawled_dir: PathBuf,
    page_size: u64,
    page_pause: Duration,
    max_pages: u64,
}

impl CommentCrawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, crawled_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            crawled_dir: crawled_dir.into(),
            page_size: 20,
            page_pause: Duration::from_secs(3),
            max_pages: 5000,
        }
    }

    /// Crawler using the configured paging and storage layout
    pub fn from_config(fetcher: Arc<dyn PageFetcher>, config: &Config) -> Self {
        Self::new(fetcher, config.storage.comment_crawled_dir())
            .with_paging(config.crawler.page_size, config.page_pause(), config.crawler.max_pages)
    }

    pub fn with_paging(mut self, page_size: u64, page_pause: Duration, max_pages: u64) -> Self {
        self.page_size = page_size.max(1);
        self.page_pause = page_pause;
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn crawled_dir(&self) -> &Path {
        &self.crawled_dir
    }

    /// Crawl every comment page of `movie_id`.
    ///
    /// Any fetch or storage error abandons the cycle; pages already stored
    /// stay on disk.
    pub async fn crawl(&self, movie_id: u64) -> Result<CommentCrawlOutcome, CrawlerError> {
        let mut start_index = 0;
        let mut total_count = None;
        let mut outcome = CommentCrawlOutcome {
            movie_id,
            total_count: 0,
            pages: 0,
            records: 0,
            files: Vec::new(),
        };

        loop {
            if outcome.pages >= self.max_pages {
                tracing::warn!(movie_id, pages = outcome.pages, "Reached maximum page limit");
                break;
            }

            let page = self.fetcher.fetch_comments(movie_id, start_index).await?;
            if start_index == 0 {
                total_count = page.total_count;
            }

            if page.records.is_empty() {
                break;
            }

            tracing::debug!(movie_id, start_index, comments = page.records.len(), "Comment page fetched");

            outcome.files.push(self.save_page(movie_id, &page.records)?);
            outcome.pages += 1;
            outcome.records += page.records.len();
            start_index += self.page_size;

            if !self.page_pause.is_zero() {
                tokio::time::sleep(self.page_pause).await;
            }
        }

        outcome.total_count = total_count.ok_or(CrawlerError::MissingTotal(movie_id))?;

        tracing::info!(
            movie_id,
            total_count = outcome.total_count,
            pages = outcome.pages,
            comments = outcome.records,
            "Comment crawl completed"
        );
        Ok(outcome)
    }

    fn save_page(&self, movie_id: u64, records: &[CommentRecord]) -> Result<PathBuf, CrawlerError> {
        let now = Local::now();
        let path = self.crawled_dir.join(format!(
            "comment_{movie_id}_{}_{}.json",
            now.format("%Y-%m-%d"),
            now.format("%H.%M.%S.%6f")
        ));
        write_json_atomic(&path, records).map_err(|e| CrawlerError::storage(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::info::MovieInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const FIRST_PAGE: &str = r#"
        <html><body>
        <h1 class="title">短评 (1234)</h1>
        <div id="comment-list"><ul>
          <li>
            <div class="desc">
              <a href="https://m.example.com/people/alice/"><span class="user-name">alice</span></a>
              <span class="rating-stars" data-rating="4"></span>
              <span class="date">2024-05-01</span>
            </div>
            <div class="comment-content"><p>  Great
              movie </p></div>
            <div class="btn-info"><span class="text">12</span></div>
          </li>
          <li>
            <div class="desc">
              <a href="https://m.example.com/people/bob/"><span class="user-name">bob</span></a>
              <span class="date">2024-05-02</span>
            </div>
            <div class="comment-content"><p>No stars</p></div>
            <div class="btn-info"><span class="text"></span></div>
          </li>
        </ul></div>
        </body></html>
    "#;

    #[test]
    fn test_parse_first_page() {
        let page = parse_comment_page(FIRST_PAGE, 7, "u", true).unwrap();
        assert_eq!(page.total_count, Some(1234));
        assert_eq!(page.records.len(), 2);

        let alice = &page.records[0];
        assert_eq!(alice.user_name, "alice");
        assert_eq!(alice.user_url, "https://m.example.com/people/alice/");
        assert_eq!(alice.rating_stars, Some(4));
        assert_eq!(alice.comment_timestamp, "2024-05-01");
        assert_eq!(alice.comment_content, "Great movie");
        assert_eq!(alice.comment_like_count, 12);

        let bob = &page.records[1];
        assert_eq!(bob.rating_stars, None);
        assert_eq!(bob.comment_like_count, 0);
        assert_eq!(bob.movie_id, 7);
    }

    #[test]
    fn test_parse_later_page_ignores_total() {
        let page = parse_comment_page(FIRST_PAGE, 7, "u", false).unwrap();
        assert_eq!(page.total_count, None);
    }

    #[test]
    fn test_parse_empty_list() {
        let html = r#"<div id="comment-list"><ul></ul></div>"#;
        let page = parse_comment_page(html, 7, "u", false).unwrap();
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_parse_missing_container() {
        let err = parse_comment_page("<html><body>blocked</body></html>", 7, "u", false).unwrap_err();
        assert!(matches!(err, FetchError::MissingElement { .. }));
    }

    #[test]
    fn test_parse_first_page_without_total() {
        let html = r#"<div id="comment-list"><ul></ul></div>"#;
        assert!(parse_comment_page(html, 7, "u", true).is_err());
    }

    #[test]
    fn test_job_id_round_trip() {
        assert_eq!(comment_job_id(1291546), "comment_crawl_1291546");
        assert_eq!(movie_id_from_job_id("comment_crawl_1291546"), Some(1291546));
        assert_eq!(movie_id_from_job_id("daily_routine_job"), None);
        assert_eq!(movie_id_from_job_id("comment_crawl_x"), None);
    }

    struct ScriptedFetcher {
        pages: Mutex<Vec<Result<CommentPage, FetchError>>>,
        starts: Mutex<Vec<u64>>,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Result<CommentPage, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                starts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_comments(&self, _movie_id: u64, start_index: u64) -> Result<CommentPage, FetchError> {
            self.starts.lock().unwrap().push(start_index);
            self.pages.lock().unwrap().pop().unwrap_or_else(|| Ok(CommentPage::default()))
        }

        async fn fetch_info(&self, _movie_id: u64, _rating_only: bool) -> Result<MovieInfo, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    fn record(user: &str) -> CommentRecord {
        CommentRecord {
            movie_id: 7,
            user_url: String::new(),
            user_name: user.into(),
            rating_stars: Some(3),
            comment_timestamp: "2024-05-01".into(),
            comment_content: "ok".into(),
            comment_like_count: 0,
        }
    }

    fn page(total: Option<u64>, users: &[&str]) -> Result<CommentPage, FetchError> {
        Ok(CommentPage {
            total_count: total,
            records: users.iter().map(|u| record(u)).collect(),
        })
    }

    #[tokio::test]
    async fn test_crawl_paginates_until_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![
            page(Some(45), &["a", "b"]),
            page(None, &["c"]),
            page(None, &[]),
        ]);
        let crawler = CommentCrawler::new(fetcher.clone(), dir.path())
            .with_paging(20, Duration::ZERO, 100);

        let outcome = crawler.crawl(7).await.unwrap();
        assert_eq!(outcome.total_count, 45);
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.records, 3);
        assert_eq!(*fetcher.starts.lock().unwrap(), vec![0, 20, 40]);

        for file in &outcome.files {
            let name = file.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("comment_7_"));
            assert!(name.ends_with(".json"));
        }
        let stored: Vec<CommentRecord> =
            serde_json::from_str(&std::fs::read_to_string(&outcome.files[0]).unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_crawl_without_comments_reports_total() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![page(Some(0), &[])]);
        let crawler = CommentCrawler::new(fetcher, dir.path()).with_paging(20, Duration::ZERO, 100);

        let outcome = crawler.crawl(7).await.unwrap();
        assert_eq!(outcome.total_count, 0);
        assert!(outcome.files.is_empty());
    }

    #[tokio::test]
    async fn test_crawl_error_abandons_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![
            page(Some(45), &["a"]),
            Err(FetchError::ServerError(503)),
        ]);
        let crawler = CommentCrawler::new(fetcher, dir.path()).with_paging(20, Duration::ZERO, 100);

        let err = crawler.crawl(7).await.unwrap_err();
        assert!(matches!(err, CrawlerError::Fetch(FetchError::ServerError(503))));
    }

    #[tokio::test]
    async fn test_crawl_stops_at_page_cap() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![
            page(Some(100), &["a"]),
            page(None, &["b"]),
            page(None, &["c"]),
        ]);
        let crawler = CommentCrawler::new(fetcher, dir.path()).with_paging(1, Duration::ZERO, 2);

        let outcome = crawler.crawl(7).await.unwrap();
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.total_count, 100);
    }
}
