//! Error types for the cinetrack crawlers
//!
//! This module defines custom error types used throughout the application.

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Page not found
    #[error("Page not found: {0}")]
    NotFound(String),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// An element the page must contain is absent
    #[error("Missing element '{element}' on {url}")]
    MissingElement { element: String, url: String },

    /// Content decoding error
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn missing(element: impl Into<String>, url: impl Into<String>) -> Self {
        Self::MissingElement {
            element: element.into(),
            url: url.into(),
        }
    }

    /// Whether a later attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimit | Self::Timeout => true,
            Self::ServerError(status) => *status >= 500,
            _ => false,
        }
    }
}

/// Errors that can occur while turning page content into records
#[derive(Error, Debug)]
pub enum ParseError {
    /// A field could not be converted
    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: String, value: String },

    /// Embedded JSON-LD block is malformed
    #[error("Invalid structured data: {0}")]
    InvalidStructuredData(String),

    /// Invalid date format
    #[error("Invalid date format: {0}")]
    InvalidDate(String),
}

impl ParseError {
    pub fn invalid_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// General crawler errors
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Crawled data could not be stored
    #[error("Failed to write {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The first page carried no total comment count
    #[error("Total comment count missing for movie {0}")]
    MissingTotal(u64),
}

impl CrawlerError {
    pub fn storage(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.display().to_string(),
            source,
        }
    }

    /// Whether a later crawl cycle may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Storage { .. } => true,
            Self::Parse(_) | Self::MissingTotal(_) => false,
        }
    }
}
