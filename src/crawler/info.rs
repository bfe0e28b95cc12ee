//! Movie information and rating crawling
//!
//! The movie page embeds a JSON-LD block with title, credits and aggregate
//! rating; the rest comes from the page markup. Titles that already have
//! ratings are only re-read for their rating, which is appended to a
//! per-movie rating history keyed by date.

use chrono::{Local, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use super::fetcher::PageFetcher;
use crate::movies::{MovieRecord, SharedMovieList};
use crate::utils::error::{CrawlerError, FetchError, ParseError};
use crate::utils::{normalize_whitespace, read_json_opt, write_json_atomic};

static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| parse_selector!(r#"script[type="application/ld+json"]"#));
static YEAR: LazyLock<Selector> = LazyLock::new(|| parse_selector!("span.year"));
static RELEASE_DATE: LazyLock<Selector> =
    LazyLock::new(|| parse_selector!(r#"span[property="v:initialReleaseDate"]"#));
static GENRE: LazyLock<Selector> = LazyLock::new(|| parse_selector!(r#"span[property="v:genre"]"#));
static SUMMARY: LazyLock<Selector> =
    LazyLock::new(|| parse_selector!(r#"span[property="v:summary"]"#));
static WEIGHT_ITEM: LazyLock<Selector> =
    LazyLock::new(|| parse_selector!("div.ratings-on-weight div.item"));
static WEIGHT_PERCENT: LazyLock<Selector> = LazyLock::new(|| parse_selector!("span.rating_per"));

/// Credited person
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub url: String,
}

/// Aggregate rating at crawl time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingSummary {
    /// Average as displayed, empty when unrated
    #[serde(rename = "avg")]
    pub average: String,
    pub count: u64,

    /// Share of each star level, keyed `1_star` to `5_star`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub weights: BTreeMap<String, String>,
}

/// Descriptive fields, only read on a full crawl
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieDetails {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub year: String,
    pub release_dates: Vec<String>,
    pub genres: Vec<String>,
    pub summary: String,
    pub directors: Vec<Person>,
    pub writers: Vec<Person>,
    pub cast: Vec<Person>,
}

/// Parsed movie page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieInfo {
    pub movie_id: u64,
    pub url: String,
    pub details: Option<MovieDetails>,
    pub rating: RatingSummary,
}

/// Stored movie information file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieInfoRecord {
    pub movie_id: u64,
    pub url: String,
    #[serde(flatten)]
    pub details: MovieDetails,
    pub rating: RatingSummary,
    #[serde(default)]
    pub rating_start_date: Option<NaiveDate>,
}

/// Rating history of one movie
pub type RatingHistory = BTreeMap<NaiveDate, RatingSummary>;

#[derive(Debug, Deserialize)]
struct LdMovie {
    #[serde(default)]
    name: String,
    #[serde(rename = "@type", default)]
    kind: String,
    #[serde(default)]
    director: Vec<LdPerson>,
    #[serde(default)]
    author: Vec<LdPerson>,
    #[serde(default)]
    actor: Vec<LdPerson>,
    #[serde(rename = "aggregateRating", default)]
    aggregate_rating: Option<LdRating>,
}

#[derive(Debug, Deserialize)]
struct LdPerson {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct LdRating {
    #[serde(rename = "ratingCount", default)]
    rating_count: serde_json::Value,
    #[serde(rename = "ratingValue", default)]
    rating_value: serde_json::Value,
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// JSON-LD text is not entity-decoded by the HTML parser
fn decode(text: &str) -> String {
    html_escape::decode_html_entities(text).trim().to_string()
}

fn people(list: Vec<LdPerson>, base_url: &str) -> Vec<Person> {
    list.into_iter()
        .map(|p| Person {
            name: decode(&p.name),
            url: format!("{base_url}{}", p.url),
        })
        .collect()
}

/// Parse a movie page.
///
/// The JSON-LD block is required. Star weights are only read for rated
/// titles, descriptive fields only when `rating_only` is unset.
pub fn parse_info_page(
    html: &str,
    movie_id: u64,
    url: &str,
    base_url: &str,
    rating_only: bool,
) -> Result<MovieInfo, FetchError> {
    let document = Html::parse_document(html);

    let script = document
        .select(&LD_JSON)
        .next()
        .ok_or_else(|| FetchError::missing("application/ld+json", url))?;
    let raw: String = script.text().collect::<String>().replace(['\n', '\r'], "");
    let ld: LdMovie = serde_json::from_str(&raw).map_err(|e| {
        FetchError::Decode(ParseError::InvalidStructuredData(e.to_string()).to_string())
    })?;

    let (average, count) = match &ld.aggregate_rating {
        Some(rating) => {
            let count_text = value_text(&rating.rating_count);
            let count = if count_text.is_empty() {
                0
            } else {
                count_text.parse::<u64>().map_err(|_| {
                    FetchError::Decode(ParseError::invalid_value("ratingCount", count_text).to_string())
                })?
            };
            (value_text(&rating.rating_value), count)
        }
        None => (String::new(), 0),
    };

    let mut weights = BTreeMap::new();
    if count > 0 {
        let items: Vec<_> = document.select(&WEIGHT_ITEM).collect();
        for (star, item) in items.into_iter().rev().take(5).enumerate() {
            if let Some(percent) = item.select(&WEIGHT_PERCENT).next() {
                weights.insert(format!("{}_star", star + 1), element_text(percent));
            }
        }
    }

    let rating = RatingSummary {
        average,
        count,
        weights,
    };

    let details = if rating_only {
        None
    } else {
        let year = document
            .select(&YEAR)
            .next()
            .map(element_text)
            .unwrap_or_default()
            .trim_matches(|c: char| c == '(' || c == ')')
            .to_string();

        Some(MovieDetails {
            title: decode(&ld.name),
            kind: ld.kind,
            year,
            release_dates: document.select(&RELEASE_DATE).map(element_text).collect(),
            genres: document.select(&GENRE).map(element_text).collect(),
            summary: document.select(&SUMMARY).next().map(element_text).unwrap_or_default(),
            directors: people(ld.director, base_url),
            writers: people(ld.author, base_url),
            cast: people(ld.actor, base_url),
        })
    };

    Ok(MovieInfo {
        movie_id,
        url: url.to_string(),
        details,
        rating,
    })
}

/// Result of crawling one movie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoCrawlOutcome {
    pub movie_id: u64,
    pub rating_only: bool,

    /// Set when a full crawl found the title rated for the first time
    pub rating_start_date: Option<NaiveDate>,
}

/// Counts of one pass over the movie list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoCrawlReport {
    pub crawled: usize,
    pub rating_started: usize,
    pub failed: usize,
}

/// Movie page crawler
pub struct MovieInfoCrawler {
    fetcher: Arc<dyn PageFetcher>,
    info_dir: PathBuf,
}

impl MovieInfoCrawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, info_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            info_dir: info_dir.into(),
        }
    }

    pub fn info_path(&self, movie_id: u64) -> PathBuf {
        self.info_dir.join(format!("{movie_id}_movie_info.json"))
    }

    pub fn rating_path(&self, movie_id: u64) -> PathBuf {
        self.info_dir.join(format!("{movie_id}_movie_rating.json"))
    }

    /// Crawl one movie and store what was read.
    ///
    /// A full crawl rewrites the information file; every crawl records the
    /// rating for `today` in the rating history.
    pub async fn crawl(
        &self,
        record: &MovieRecord,
        today: NaiveDate,
    ) -> Result<InfoCrawlOutcome, CrawlerError> {
        let rating_only = record.have_rates;
        let info = self.fetcher.fetch_info(record.movie_id, rating_only).await?;

        let rating_start_date = (!rating_only && info.rating.count > 0).then_some(today);

        if let Some(details) = info.details.clone() {
            let stored = MovieInfoRecord {
                movie_id: info.movie_id,
                url: info.url.clone(),
                details,
                rating: info.rating.clone(),
                rating_start_date,
            };
            let path = self.info_path(record.movie_id);
            write_json_atomic(&path, &stored).map_err(|e| CrawlerError::storage(&path, e))?;
        }

        self.append_rating(record.movie_id, today, info.rating)?;

        tracing::debug!(movie_id = record.movie_id, rating_only, "Movie info crawled");
        Ok(InfoCrawlOutcome {
            movie_id: record.movie_id,
            rating_only,
            rating_start_date,
        })
    }

    fn append_rating(
        &self,
        movie_id: u64,
        date: NaiveDate,
        rating: RatingSummary,
    ) -> Result<(), CrawlerError> {
        let path = self.rating_path(movie_id);
        let mut history: RatingHistory = read_json_opt(&path)
            .map_err(|e| CrawlerError::storage(&path, e))?
            .unwrap_or_default();
        history.insert(date, rating);
        write_json_atomic(&path, &history).map_err(|e| CrawlerError::storage(&path, e))
    }

    /// Crawl every movie in list order.
    ///
    /// A failing movie is logged and skipped. Titles seen rated for the
    /// first time get their rating start recorded in the list.
    pub async fn crawl_all(&self, movies: &SharedMovieList) -> InfoCrawlReport {
        let records = movies.read().await.records().to_vec();
        let today = Local::now().date_naive();
        let mut report = InfoCrawlReport::default();

        for record in &records {
            match self.crawl(record, today).await {
                Ok(outcome) => {
                    report.crawled += 1;
                    if let Some(date) = outcome.rating_start_date {
                        match movies.write().await.update_rating_start(record.movie_id, date) {
                            Ok(()) => report.rating_started += 1,
                            Err(e) => tracing::error!(
                                movie_id = record.movie_id,
                                error = %e,
                                "Rating start not recorded"
                            ),
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(movie_id = record.movie_id, error = %e, "Movie info crawl failed");
                }
            }
        }

        tracing::info!(
            crawled = report.crawled,
            rating_started = report.rating_started,
            failed = report.failed,
            "Movie info crawl finished"
        );
        report
    }

    pub fn info_dir(&self) -> &Path {
        &self.info_dir
    }
}
