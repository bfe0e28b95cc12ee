//! Movie list management
//!
//! The movie list is the set of titles being tracked. Its order is the file
//! order and drives slot allocation, so it is never re-sorted. Operators add
//! titles by dropping an update file next to the list; the daily maintenance
//! job merges it in and deletes it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::utils::{read_json_opt, write_json_atomic};

/// Movie list shared between jobs
pub type SharedMovieList = Arc<RwLock<MovieList>>;

/// Errors raised by the movie list manager
#[derive(Error, Debug)]
pub enum MovieListError {
    /// The list file does not exist
    #[error("Movie list not found: {0}")]
    NotFound(String),

    /// The list file could not be read or parsed
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// The list file could not be written
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No record with the given id
    #[error("Unknown movie id {0}")]
    UnknownMovie(u64),
}

impl MovieListError {
    fn read(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::Read {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn write(path: &Path, source: std::io::Error) -> Self {
        Self::Write {
            path: path.display().to_string(),
            source,
        }
    }

    /// Whether a later attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Write { .. })
    }
}

/// One tracked title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub movie_id: u64,

    /// Total comment count seen by the last completed comment crawl
    #[serde(default)]
    pub last_crawl_total_comment_count: u64,

    /// First day the title had ratings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_start_date: Option<NaiveDate>,

    /// Once set, the info crawl only refreshes the rating
    #[serde(default)]
    pub have_rates: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl MovieRecord {
    pub fn new(movie_id: u64) -> Self {
        Self {
            movie_id,
            last_crawl_total_comment_count: 0,
            rating_start_date: None,
            have_rates: false,
            note: None,
        }
    }
}

/// Drop blank rows and repeated ids, keeping the first occurrence
pub fn normalize(rows: Vec<Option<MovieRecord>>) -> Vec<MovieRecord> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .flatten()
        .filter(|record| seen.insert(record.movie_id))
        .collect()
}

fn read_rows(path: &Path) -> Result<Option<Vec<MovieRecord>>, MovieListError> {
    let rows = read_json_opt::<Vec<Option<MovieRecord>>>(path)
        .map_err(|e| MovieListError::read(path, e))?;
    Ok(rows.map(normalize))
}

/// Ordered, deduplicated list of tracked titles
#[derive(Debug, Clone)]
pub struct MovieList {
    path: PathBuf,
    update_path: PathBuf,
    records: Vec<MovieRecord>,
}

impl MovieList {
    /// Empty list backed by `path`
    pub fn new(path: impl Into<PathBuf>, update_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            update_path: update_path.into(),
            records: Vec::new(),
        }
    }

    /// Read and normalize the list file
    pub fn load(
        path: impl Into<PathBuf>,
        update_path: impl Into<PathBuf>,
    ) -> Result<Self, MovieListError> {
        let path = path.into();
        let records = read_rows(&path)?
            .ok_or_else(|| MovieListError::NotFound(path.display().to_string()))?;

        tracing::info!(path = %path.display(), movies = records.len(), "Movie list loaded");
        Ok(Self {
            path,
            update_path: update_path.into(),
            records,
        })
    }

    /// List with the given records, not yet saved
    pub fn with_records(mut self, records: Vec<MovieRecord>) -> Self {
        self.records = normalize(records.into_iter().map(Some).collect());
        self
    }

    pub fn into_shared(self) -> SharedMovieList {
        Arc::new(RwLock::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[MovieRecord] {
        &self.records
    }

    pub fn get(&self, movie_id: u64) -> Option<&MovieRecord> {
        self.records.iter().find(|r| r.movie_id == movie_id)
    }

    /// Movie ids in list order
    pub fn movie_ids(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.movie_id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the list atomically
    pub fn save(&self) -> Result<(), MovieListError> {
        write_json_atomic(&self.path, &self.records).map_err(|e| MovieListError::write(&self.path, e))
    }

    /// Merge the operator update file into the list.
    ///
    /// Existing records win over update rows with the same id, so only new
    /// titles are added. The merged list is saved before the update file is
    /// deleted; if saving fails the list stays unchanged. Returns the number
    /// of titles added.
    pub fn apply_updates(&mut self) -> Result<usize, MovieListError> {
        let Some(updates) = read_rows(&self.update_path)? else {
            return Ok(0);
        };

        let before = self.records.len();
        let mut merged: Vec<Option<MovieRecord>> =
            self.records.iter().cloned().map(Some).collect();
        merged.extend(updates.into_iter().map(Some));
        let merged = normalize(merged);

        write_json_atomic(&self.path, &merged).map_err(|e| MovieListError::write(&self.path, e))?;
        self.records = merged;
        let added = self.records.len() - before;

        if let Err(e) = std::fs::remove_file(&self.update_path) {
            tracing::error!(
                path = %self.update_path.display(),
                error = %e,
                "Movie list update file not deleted, remove it manually"
            );
        }

        tracing::info!(added, movies = self.records.len(), "Movie list updated");
        Ok(added)
    }

    fn record_mut(&mut self, movie_id: u64) -> Result<&mut MovieRecord, MovieListError> {
        self.records
            .iter_mut()
            .find(|r| r.movie_id == movie_id)
            .ok_or(MovieListError::UnknownMovie(movie_id))
    }

    /// Record the comment total of a finished crawl and save.
    ///
    /// The in-memory value is kept even if saving fails.
    pub fn update_total_comment_count(
        &mut self,
        movie_id: u64,
        total_comment_count: u64,
    ) -> Result<(), MovieListError> {
        self.record_mut(movie_id)?.last_crawl_total_comment_count = total_comment_count;
        self.save()
    }

    /// Mark a title as rated since `date` and save
    pub fn update_rating_start(&mut self, movie_id: u64, date: NaiveDate) -> Result<(), MovieListError> {
        let record = self.record_mut(movie_id)?;
        record.rating_start_date = Some(date);
        record.have_rates = true;
        self.save()
    }
}
