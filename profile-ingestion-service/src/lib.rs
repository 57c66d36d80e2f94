// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! File ingestion orchestrator.
//!
//! One [`FileIngestion`] per schedule entry: it resolves the dated file
//! path, copies the file to a scratch location so the external feed can
//! rewrite the original while we read, parses every line into measurement
//! records, and drives the loader tier for the entry's series type before
//! reconciling totals.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{error, info, warn};
use thiserror::Error;

use core_types::config::{FilesConfig, LoadConfig};
use core_types::{
    MeasurementRecord, ScheduleEntry, FIELD_DELIMITER, INTERVAL_MINUTES, MIN_FIELDS,
};
use load_engine::{reconcile, StageLoader};
use series_cache::{CatalogResolver, SeriesCache};
use storage::{Store, StoreError};

const DATE_PLACEHOLDER: &str = "YYYYMMDD";

/// Length of the `HH:MM:SS` suffix on the file's metadata line.
const TIME_SUFFIX_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("file access error: {0}")]
    FileAccess(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Everything read out of one dated measurement file.
#[derive(Debug, Default)]
pub struct FileScan {
    pub records: Vec<MeasurementRecord>,
    /// Sum of every parsed sample across all data lines.
    pub file_total: f64,
    /// Last complete interval the feed declared, seeded from the metadata
    /// line and advanced by the first data line's interval count.
    pub last_complete: Option<NaiveDateTime>,
    /// Interval count declared by the first data line.
    pub declared_intervals: usize,
}

pub struct FileIngestion {
    file_pattern: String,
    source_dir: String,
    series_type: String,
}

impl FileIngestion {
    /// Builds the ingestion for one schedule entry. The entry's source
    /// directory gets the one-time platform prefix rewrite so schedule rows
    /// written on Windows work unmodified on a Linux host.
    pub fn new(entry: ScheduleEntry, files: &FilesConfig) -> Self {
        let source_dir = if cfg!(target_os = "linux") {
            rewrite_prefix(&entry.source_dir, &files.windows_prefix, &files.linux_prefix)
        } else {
            entry.source_dir
        };
        info!("source path for {}: {}", entry.series_type, source_dir);
        Self {
            file_pattern: entry.file_pattern,
            source_dir,
            series_type: entry.series_type,
        }
    }

    pub fn series_type(&self) -> &str {
        &self.series_type
    }

    fn full_path(&self, day: NaiveDate) -> PathBuf {
        let file_name = self
            .file_pattern
            .replace(DATE_PLACEHOLDER, &day.format("%Y%m%d").to_string());
        Path::new(&self.source_dir).join(file_name)
    }

    /// Reads and parses the file for `day`. A missing file is soft: warn
    /// and return an empty scan. Any other I/O failure is logged and
    /// re-raised.
    pub fn load_file(
        &self,
        day: NaiveDate,
        cache: &SeriesCache,
        store: &Store,
    ) -> Result<FileScan, IngestError> {
        let full_path = self.full_path(day);
        if !full_path.exists() {
            warn!("measurement file not found: {}", full_path.display());
            return Ok(FileScan::default());
        }

        // Scratch copy so we never hold the feed's file open while it is
        // being rewritten; the tempfile is removed on drop even when the
        // scan fails.
        let scratch = tempfile::Builder::new()
            .prefix("gridflow-")
            .suffix(".txt")
            .tempfile()?;
        std::fs::copy(&full_path, scratch.path())?;

        self.scan_lines(scratch.path(), day, cache, store)
            .inspect_err(|err| {
                error!(
                    "error reading {} for {} ({}): {err}",
                    full_path.display(),
                    day,
                    self.series_type
                );
            })
    }

    fn scan_lines(
        &self,
        path: &Path,
        day: NaiveDate,
        cache: &SeriesCache,
        store: &Store,
    ) -> Result<FileScan, IngestError> {
        let reader = BufReader::new(File::open(path)?);
        let resolver = CatalogResolver::new(cache, store);
        let mut scan = FileScan::default();

        for (index, line) in reader.lines().enumerate() {
            let mut line = line?;
            if !line.is_empty() && !line.ends_with(FIELD_DELIMITER) {
                line.push(FIELD_DELIMITER);
            }

            if index == 0 {
                match trailing_time(&line) {
                    Some(time) => scan.last_complete = Some(day.and_time(time)),
                    None => warn!(
                        "metadata line of {} for {} carries no interval timestamp",
                        self.series_type, day
                    ),
                }
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            if let Some(sum) = line_sum(&line) {
                scan.file_total += sum;
            }

            match MeasurementRecord::parse(&line, &self.series_type, day, &resolver) {
                Ok(record) => {
                    if index == 1 {
                        scan.declared_intervals = record.interval_count();
                        scan.last_complete = Some(
                            day.and_hms_opt(0, 0, 0).unwrap()
                                + Duration::minutes(
                                    INTERVAL_MINUTES * scan.declared_intervals as i64,
                                ),
                        );
                    }
                    scan.records.push(record);
                }
                Err(err) => warn!(
                    "skipping line {index} of {} for {}: {err}",
                    self.series_type, day
                ),
            }
        }

        Ok(scan)
    }

    /// Runs the whole day for this entry: scan, load through the tier for
    /// the series type, reconcile. Loader-internal record failures are soft;
    /// anything surfacing here is reported to the caller, which logs it and
    /// moves on to the next entry.
    pub fn process_day(
        &self,
        day: NaiveDate,
        cache: &SeriesCache,
        store: &mut Store,
        load: &LoadConfig,
    ) -> Result<(), IngestError> {
        info!("processing {} for {}", self.series_type, day);
        store.ensure_series_table(&self.series_type)?;

        let scan = self.load_file(day, cache, &*store)?;

        if self.series_type == load.bulk_series {
            if let Some(first) = scan.records.first() {
                let count = first.interval_count() as i64;
                let mut loader = StageLoader::new(store, &self.series_type, load.stage_chunk_rows)?;
                loader.stage(&scan.records, day, 0, count)?;
                let merged = loader.merge()?;
                // Clearing only happens after a successful merge; staged
                // rows survive a failed merge for the retry.
                loader.clear_stage()?;
                info!("merged {merged} rows into {}", self.series_type);
            }
        } else if !scan.records.is_empty() {
            load_engine::load_delta(store, &scan.records, day, &self.series_type)?;
        }

        reconcile::check(store, scan.file_total, day, &self.series_type)?;
        Ok(())
    }
}

/// Prefix rewrite applied to schedule paths on Linux hosts.
fn rewrite_prefix(path: &str, windows_prefix: &str, linux_prefix: &str) -> String {
    if windows_prefix.is_empty() {
        return path.to_string();
    }
    path.replace(windows_prefix, linux_prefix)
}

/// The metadata line ends `...HH:MM:SS` plus the normalized trailing
/// delimiter; pull the 8-character time out of that suffix.
fn trailing_time(line: &str) -> Option<NaiveTime> {
    if line.len() < TIME_SUFFIX_LEN + 1 {
        return None;
    }
    let suffix = line.get(line.len() - TIME_SUFFIX_LEN - 1..line.len() - 1)?;
    NaiveTime::parse_from_str(suffix, "%H:%M:%S").ok()
}

/// Per-line sample sum, independent of record parsing so malformed records
/// and loadable ones contribute consistently. `None` means the line has no
/// sample region to sum.
fn line_sum(line: &str) -> Option<f64> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }
    Some(
        fields[MIN_FIELDS - 1..]
            .iter()
            .map(|field| field.trim().parse::<f64>().unwrap_or(0.0))
            .sum(),
    )
}
