//! Comment preprocessing
//!
//! Crawled comment pages are folded in two steps:
//!
//! 1. all page files of one movie and day are concatenated into a daily file;
//! 2. the daily file is appended to the movie's merged file and duplicates on
//!    `(user_name, comment_timestamp)` are dropped, keeping the later copy.
//!
//! The scheduled pass handles the previous day. At startup every crawled day
//! without a daily file is caught up.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::StorageConfig;
use crate::crawler::CommentRecord;
use crate::utils::{read_json_opt, write_json_atomic};

/// Errors raised while preprocessing comment files
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl PreprocessError {
    fn read(path: &Path, source: io::Error) -> Self {
        Self::Read {
            path: path.display().to_string(),
            source,
        }
    }

    fn write(path: &Path, source: io::Error) -> Self {
        Self::Write {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type PreprocessResult<T> = std::result::Result<T, PreprocessError>;

/// Date encoded in a comment file name.
///
/// Both `comment_{id}_{date}_{time}.json` and `comment_{id}_{date}.json`
/// carry the date as their third `_`/`.` separated token.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let token = name.split(['_', '.']).nth(2)?;
    NaiveDate::parse_from_str(token, "%Y-%m-%d").ok()
}

/// Drop duplicate comments, keeping the last occurrence of each key in place
pub fn dedup_keep_last(records: Vec<CommentRecord>) -> Vec<CommentRecord> {
    let mut seen = HashSet::new();
    let mut kept: Vec<CommentRecord> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert((r.user_name.clone(), r.comment_timestamp.clone())))
        .collect();
    kept.reverse();
    kept
}

/// Counts of one preprocessing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessReport {
    pub combined: usize,
    pub merged: usize,
    pub failed: usize,
}

/// File-level comment preprocessor
#[derive(Debug, Clone)]
pub struct Preprocessor {
    crawled_dir: PathBuf,
    daily_dir: PathBuf,
    merged_dir: PathBuf,
}

impl Preprocessor {
    pub fn new(
        crawled_dir: impl Into<PathBuf>,
        daily_dir: impl Into<PathBuf>,
        merged_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            crawled_dir: crawled_dir.into(),
            daily_dir: daily_dir.into(),
            merged_dir: merged_dir.into(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(
            storage.comment_crawled_dir(),
            storage.comment_daily_dir(),
            storage.comment_merged_dir(),
        )
    }

    pub fn daily_path(&self, movie_id: u64, date: NaiveDate) -> PathBuf {
        self.daily_dir
            .join(format!("comment_{movie_id}_{}.json", date.format("%Y-%m-%d")))
    }

    pub fn merged_path(&self, movie_id: u64) -> PathBuf {
        self.merged_dir.join(format!("comment_{movie_id}.json"))
    }

    /// File names in `dir` belonging to `movie_id`, sorted
    fn movie_files(dir: &Path, movie_id: u64) -> PreprocessResult<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PreprocessError::read(dir, e)),
        };

        let prefix = format!("comment_{movie_id}_");
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PreprocessError::read(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_records(path: &Path) -> PreprocessResult<Option<Vec<CommentRecord>>> {
        read_json_opt(path).map_err(|e| PreprocessError::read(path, e))
    }

    /// Concatenate the crawled pages of one day into the daily file.
    ///
    /// Returns the number of comments written, or `None` when nothing was
    /// crawled that day.
    pub fn combine_daily(&self, movie_id: u64, date: NaiveDate) -> PreprocessResult<Option<usize>> {
        let files: Vec<String> = Self::movie_files(&self.crawled_dir, movie_id)?
            .into_iter()
            .filter(|name| date_from_file_name(name) == Some(date))
            .collect();
        if files.is_empty() {
            return Ok(None);
        }

        let mut records = Vec::new();
        for name in &files {
            let path = self.crawled_dir.join(name);
            records.extend(Self::read_records(&path)?.unwrap_or_default());
        }

        let path = self.daily_path(movie_id, date);
        write_json_atomic(&path, &records).map_err(|e| PreprocessError::write(&path, e))?;

        tracing::debug!(movie_id, date = %date, files = files.len(), comments = records.len(), "Daily comments combined");
        Ok(Some(records.len()))
    }

    /// Fold the daily file of `date` into the merged file.
    ///
    /// Returns the merged size, or `None` when there is no daily file.
    pub fn merge(&self, movie_id: u64, date: NaiveDate) -> PreprocessResult<Option<usize>> {
        let Some(daily) = Self::read_records(&self.daily_path(movie_id, date))? else {
            return Ok(None);
        };

        let path = self.merged_path(movie_id);
        let mut records = Self::read_records(&path)?.unwrap_or_default();
        records.extend(daily);
        let records = dedup_keep_last(records);

        write_json_atomic(&path, &records).map_err(|e| PreprocessError::write(&path, e))?;

        tracing::debug!(movie_id, date = %date, comments = records.len(), "Comments merged");
        Ok(Some(records.len()))
    }

    /// Crawled days of `movie_id` that have no daily file yet
    pub fn pending_dates(&self, movie_id: u64) -> PreprocessResult<BTreeSet<NaiveDate>> {
        let dates_in = |dir: &Path| -> PreprocessResult<BTreeSet<NaiveDate>> {
            Ok(Self::movie_files(dir, movie_id)?
                .iter()
                .filter_map(|name| date_from_file_name(name))
                .collect())
        };

        let crawled = dates_in(&self.crawled_dir)?;
        let combined = dates_in(&self.daily_dir)?;
        Ok(crawled.difference(&combined).copied().collect())
    }

    fn process(&self, movie_id: u64, date: NaiveDate, report: &mut PreprocessReport) {
        let result = self
            .combine_daily(movie_id, date)
            .and_then(|combined| match combined {
                Some(_) => {
                    report.combined += 1;
                    self.merge(movie_id, date)
                }
                None => Ok(None),
            });

        match result {
            Ok(Some(_)) => report.merged += 1,
            Ok(None) => {}
            Err(e) => {
                report.failed += 1;
                tracing::error!(movie_id, date = %date, operation = "preprocess", error = %e, "Preprocessing failed");
            }
        }
    }

    /// Combine and merge one day for every movie
    pub fn run_for_date(&self, movie_ids: &[u64], date: NaiveDate) -> PreprocessReport {
        let mut report = PreprocessReport::default();
        for &movie_id in movie_ids {
            self.process(movie_id, date, &mut report);
        }

        tracing::info!(
            date = %date,
            combined = report.combined,
            merged = report.merged,
            failed = report.failed,
            "Preprocessing finished"
        );
        report
    }

    /// Catch up every pending day for every movie, oldest first
    pub fn run_all(&self, movie_ids: &[u64]) -> PreprocessReport {
        let mut report = PreprocessReport::default();
        for &movie_id in movie_ids {
            match self.pending_dates(movie_id) {
                Ok(dates) => {
                    for date in dates {
                        self.process(movie_id, date, &mut report);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(movie_id, operation = "pending_dates", error = %e, "Preprocessing failed");
                }
            }
        }

        tracing::info!(
            combined = report.combined,
            merged = report.merged,
            failed = report.failed,
            "Catch-up preprocessing finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(user: &str, timestamp: &str, content: &str) -> CommentRecord {
        CommentRecord {
            movie_id: 1,
            user_url: String::new(),
            user_name: user.into(),
            rating_stars: None,
            comment_timestamp: timestamp.into(),
            comment_content: content.into(),
            comment_like_count: 0,
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Preprocessor) {
        let dir = tempfile::tempdir().unwrap();
        let pre = Preprocessor::new(
            dir.path().join("crawled"),
            dir.path().join("daily"),
            dir.path().join("merged"),
        );
        (dir, pre)
    }

    fn write_page(pre: &Preprocessor, name: &str, records: &[CommentRecord]) {
        write_json_atomic(&pre.crawled_dir.join(name), records).unwrap();
    }

    #[test]
    fn test_date_from_file_name() {
        assert_eq!(
            date_from_file_name("comment_1_2024-05-03_10.11.12.000001.json"),
            Some(date(3))
        );
        assert_eq!(date_from_file_name("comment_1_2024-05-03.json"), Some(date(3)));
        assert_eq!(date_from_file_name("comment_1.json"), None);
    }

    #[test]
    fn test_dedup_keeps_last_occurrence() {
        let records = vec![
            comment("a", "t1", "old"),
            comment("b", "t1", "b"),
            comment("a", "t1", "new"),
            comment("a", "t2", "other day"),
        ];
        let kept = dedup_keep_last(records);
        let contents: Vec<_> = kept.iter().map(|r| r.comment_content.as_str()).collect();
        assert_eq!(contents, vec!["b", "new", "other day"]);
    }

    #[test]
    fn test_combine_daily_concatenates_in_time_order() {
        let (_dir, pre) = setup();
        write_page(&pre, "comment_1_2024-05-03_10.00.00.000000.json", &[comment("a", "t", "1")]);
        write_page(&pre, "comment_1_2024-05-03_09.00.00.000000.json", &[comment("b", "t", "0")]);
        write_page(&pre, "comment_1_2024-05-04_09.00.00.000000.json", &[comment("c", "t", "x")]);
        write_page(&pre, "comment_12_2024-05-03_09.00.00.000000.json", &[comment("d", "t", "x")]);

        assert_eq!(pre.combine_daily(1, date(3)).unwrap(), Some(2));
        let daily: Vec<CommentRecord> = read_json_opt(&pre.daily_path(1, date(3))).unwrap().unwrap();
        assert_eq!(daily[0].user_name, "b");
        assert_eq!(daily[1].user_name, "a");

        assert_eq!(pre.combine_daily(1, date(5)).unwrap(), None);
    }

    #[test]
    fn test_merge_dedups_against_existing() {
        let (_dir, pre) = setup();
        write_page(&pre, "comment_1_2024-05-03_10.00.00.000000.json", &[comment("a", "t1", "first")]);
        write_page(&pre, "comment_1_2024-05-04_10.00.00.000000.json", &[
            comment("a", "t1", "edited"),
            comment("b", "t2", "new"),
        ]);

        let report = pre.run_for_date(&[1], date(3));
        assert_eq!(report.merged, 1);
        let report = pre.run_for_date(&[1], date(4));
        assert_eq!(report, PreprocessReport { combined: 1, merged: 1, failed: 0 });

        let merged: Vec<CommentRecord> = read_json_opt(&pre.merged_path(1)).unwrap().unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].comment_content, "edited");
    }

    #[test]
    fn test_run_all_catches_up_pending_dates() {
        let (_dir, pre) = setup();
        write_page(&pre, "comment_1_2024-05-01_10.00.00.000000.json", &[comment("a", "t1", "x")]);
        write_page(&pre, "comment_1_2024-05-02_10.00.00.000000.json", &[comment("b", "t2", "x")]);
        pre.run_for_date(&[1], date(1));

        assert_eq!(pre.pending_dates(1).unwrap(), BTreeSet::from([date(2)]));

        let report = pre.run_all(&[1, 2]);
        assert_eq!(report.combined, 1);
        assert!(pre.pending_dates(1).unwrap().is_empty());

        let merged: Vec<CommentRecord> = read_json_opt(&pre.merged_path(1)).unwrap().unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_corrupt_page_is_reported() {
        let (_dir, pre) = setup();
        fs::create_dir_all(&pre.crawled_dir).unwrap();
        fs::write(pre.crawled_dir.join("comment_1_2024-05-01_10.00.00.000000.json"), "{broken").unwrap();

        let report = pre.run_for_date(&[1], date(1));
        assert_eq!(report.failed, 1);
        assert!(!pre.daily_path(1, date(1)).exists());
    }
}
