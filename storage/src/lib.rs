// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Relational store behind the ingestion pipeline.
//!
//! One SQLite database holds the series catalog (natural key -> surrogate
//! id), the ingest schedule, one fact table per series type, and a transient
//! staging table for the high-volume merge path. Fact and staging table
//! names come from the schedule catalog, so they pass an identifier guard
//! before being spliced into SQL.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};
use rusqlite::{params, Connection, OpenFlags};
use thiserror::Error;

use core_types::{ScheduleEntry, SeriesId, SeriesKey};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("series type {0:?} is not a valid table name")]
    InvalidTable(String),
}

const STORE_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS series_catalog (
    dim1 TEXT NOT NULL COLLATE NOCASE,
    dim2 TEXT NOT NULL COLLATE NOCASE,
    dim3 TEXT NOT NULL COLLATE NOCASE,
    element TEXT NOT NULL COLLATE NOCASE,
    category TEXT NOT NULL COLLATE NOCASE,
    series_type TEXT NOT NULL COLLATE NOCASE,
    series_id INTEGER PRIMARY KEY AUTOINCREMENT,
    aux TEXT,
    UNIQUE (dim1, dim2, dim3, element, category, series_type)
);

CREATE TABLE IF NOT EXISTS ingest_schedule (
    file_pattern TEXT NOT NULL,
    source_dir TEXT NOT NULL,
    series_type TEXT NOT NULL
);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columnar buffer of sample rows awaiting insertion, one entry per column
/// across all rows.
#[derive(Debug, Default)]
pub struct SampleBatch {
    series_ids: Vec<SeriesId>,
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
    dates: Vec<NaiveDate>,
    intervals: Vec<i64>,
    tags: Vec<String>,
}

impl SampleBatch {
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            series_ids: Vec::with_capacity(rows),
            timestamps: Vec::with_capacity(rows),
            values: Vec::with_capacity(rows),
            dates: Vec::with_capacity(rows),
            intervals: Vec::with_capacity(rows),
            tags: Vec::with_capacity(rows),
        }
    }

    pub fn push_row(
        &mut self,
        series_id: SeriesId,
        timestamp: NaiveDateTime,
        value: f64,
        date: NaiveDate,
        interval: i64,
        tag: &str,
    ) {
        self.series_ids.push(series_id);
        self.timestamps.push(timestamp);
        self.values.push(value);
        self.dates.push(date);
        self.intervals.push(interval);
        self.tags.push(tag.to_string());
    }

    pub fn len(&self) -> usize {
        self.series_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series_ids.is_empty()
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if needed) the store at `path` and applies the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch(STORE_SCHEMA)?;
        info!("store opened at {}", path.display());
        Ok(Self { conn })
    }

    /// In-memory store, used by tests and one-off tooling.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STORE_SCHEMA)?;
        Ok(Self { conn })
    }

    // ---- series catalog -------------------------------------------------

    /// Full catalog scan for the identity preload.
    pub fn scan_catalog(&self) -> StoreResult<Vec<(SeriesKey, SeriesId)>> {
        let mut stmt = self.conn.prepare(
            "SELECT dim1, dim2, dim3, element, category, series_type, series_id
             FROM series_catalog ORDER BY dim1, dim2, dim3",
        )?;
        let rows = stmt.query_map([], key_id_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Creates a catalog row for `key` under the fixed `category` literal.
    /// A uniqueness conflict means another resolver got there first and is
    /// not an error; the caller re-queries either way. Returns the number of
    /// rows actually inserted.
    pub fn insert_catalog_entry(&self, key: &SeriesKey, category: &str) -> StoreResult<usize> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO series_catalog
                 (dim1, dim2, dim3, element, category, series_type, aux)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![
                key.dim1,
                key.dim2,
                key.dim3,
                key.element,
                category,
                key.series_type
            ],
        )?;
        debug!(
            "catalog insert for {} ({} row)",
            key.cache_key(),
            inserted
        );
        Ok(inserted)
    }

    /// Catalog rows matching `key` with the fixed `category` literal, for the
    /// keyed reload after a miss.
    pub fn find_catalog_entries(
        &self,
        key: &SeriesKey,
        category: &str,
    ) -> StoreResult<Vec<(SeriesKey, SeriesId)>> {
        let mut stmt = self.conn.prepare(
            "SELECT dim1, dim2, dim3, element, category, series_type, series_id
             FROM series_catalog
             WHERE dim1 = ?1 AND dim2 = ?2 AND dim3 = ?3
               AND element = ?4 AND category = ?5 AND series_type = ?6",
        )?;
        let rows = stmt.query_map(
            params![
                key.dim1,
                key.dim2,
                key.dim3,
                key.element,
                category,
                key.series_type
            ],
            key_id_from_row,
        )?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // ---- ingest schedule ------------------------------------------------

    /// Schedule rows whose pattern starts with `pattern_filter`, deduplicated.
    pub fn read_schedule(&self, pattern_filter: &str) -> StoreResult<Vec<ScheduleEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_pattern, source_dir, series_type
             FROM ingest_schedule
             WHERE file_pattern LIKE ?1
             GROUP BY file_pattern, source_dir, series_type",
        )?;
        let like = format!("{pattern_filter}%");
        let rows = stmt.query_map(params![like], |row| {
            Ok(ScheduleEntry {
                file_pattern: row.get(0)?,
                source_dir: row.get(1)?,
                series_type: row.get(2)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn add_schedule_entry(&self, entry: &ScheduleEntry) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO ingest_schedule (file_pattern, source_dir, series_type)
             VALUES (?1, ?2, ?3)",
            params![entry.file_pattern, entry.source_dir, entry.series_type],
        )?;
        Ok(())
    }

    // ---- fact tables ----------------------------------------------------

    /// Creates the fact table for `series_type` if missing. The tuple
    /// (series_id, sample_date, interval_no, tag) is the natural key of the
    /// table and is enforced as UNIQUE.
    pub fn ensure_series_table(&self, series_type: &str) -> StoreResult<()> {
        let table = check_table_name(series_type)?;
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                series_id INTEGER NOT NULL,
                sample_ts TEXT NOT NULL,
                value REAL NOT NULL,
                sample_date TEXT NOT NULL,
                interval_no INTEGER NOT NULL,
                tag TEXT NOT NULL,
                loaded_at TEXT,
                UNIQUE (series_id, sample_date, interval_no, tag)
            );
            CREATE INDEX IF NOT EXISTS "idx_{table}_date" ON "{table}" (sample_date);
            "#
        ))?;
        Ok(())
    }

    /// Highest interval already persisted for the day, or -1 when the day
    /// has no rows yet. This is the load watermark.
    pub fn last_interval(&self, series_type: &str, day: NaiveDate) -> StoreResult<i64> {
        let table = check_table_name(series_type)?;
        let max = self.conn.query_row(
            &format!(
                r#"SELECT COALESCE(MAX(interval_no), -1) FROM "{table}" WHERE sample_date = ?1"#
            ),
            params![day.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// Sum of every persisted value for the day, for reconciliation.
    pub fn day_sum(&self, series_type: &str, day: NaiveDate) -> StoreResult<f64> {
        let table = check_table_name(series_type)?;
        let sum = self.conn.query_row(
            &format!(r#"SELECT COALESCE(SUM(value), 0.0) FROM "{table}" WHERE sample_date = ?1"#),
            params![day.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    /// Writes a batch of sample rows in one transaction (one round trip per
    /// record for the incremental path).
    pub fn insert_samples(&mut self, series_type: &str, batch: &SampleBatch) -> StoreResult<usize> {
        let table = check_table_name(series_type)?.to_string();
        if batch.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                r#"INSERT INTO "{table}"
                       (series_id, sample_ts, value, sample_date, interval_no, tag)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#
            ))?;
            for i in 0..batch.len() {
                inserted += stmt.execute(params![
                    batch.series_ids[i],
                    batch.timestamps[i].format(TS_FORMAT).to_string(),
                    batch.values[i],
                    batch.dates[i].format(DATE_FORMAT).to_string(),
                    batch.intervals[i],
                    batch.tags[i],
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    // ---- staging --------------------------------------------------------

    /// Creates the staging table for `series_type` if missing. Same shape as
    /// the fact table but without constraints: duplicates are allowed here
    /// and collapsed by the merge.
    pub fn ensure_stage_table(&self, series_type: &str) -> StoreResult<()> {
        let stage = stage_table_name(series_type)?;
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{stage}" (
                series_id INTEGER NOT NULL,
                sample_ts TEXT NOT NULL,
                value REAL NOT NULL,
                sample_date TEXT NOT NULL,
                interval_no INTEGER NOT NULL,
                tag TEXT NOT NULL
            );
            "#
        ))?;
        Ok(())
    }

    /// Writes the batch to the staging table in chunks of at most
    /// `chunk_rows` rows, each chunk its own transaction, to cap transaction
    /// size. Returns the number of staged rows.
    pub fn insert_stage_rows(
        &mut self,
        series_type: &str,
        batch: &SampleBatch,
        chunk_rows: usize,
    ) -> StoreResult<usize> {
        let stage = stage_table_name(series_type)?;
        let chunk_rows = chunk_rows.max(1);
        let mut staged = 0;
        let mut start = 0;
        while start < batch.len() {
            let end = (start + chunk_rows).min(batch.len());
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    r#"INSERT INTO "{stage}"
                           (series_id, sample_ts, value, sample_date, interval_no, tag)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#
                ))?;
                for i in start..end {
                    staged += stmt.execute(params![
                        batch.series_ids[i],
                        batch.timestamps[i].format(TS_FORMAT).to_string(),
                        batch.values[i],
                        batch.dates[i].format(DATE_FORMAT).to_string(),
                        batch.intervals[i],
                        batch.tags[i],
                    ])?;
                }
            }
            tx.commit()?;
            debug!("staged rows {start}..{end} into {stage}");
            start = end;
        }
        Ok(staged)
    }

    /// Moves staged rows into the fact table. Only tuples absent from the
    /// fact table are inserted; duplicate staged tuples collapse to one row
    /// (earliest timestamp, averaged value), which makes a rerun of
    /// stage+merge a no-op. Returns the number of merged rows.
    pub fn merge_stage(&self, series_type: &str) -> StoreResult<usize> {
        let table = check_table_name(series_type)?;
        let stage = stage_table_name(series_type)?;
        let merged = self.conn.execute(
            &format!(
                r#"
                INSERT INTO "{table}"
                    (series_id, sample_ts, value, sample_date, interval_no, tag, loaded_at)
                SELECT
                    b.series_id,
                    MIN(b.sample_ts),
                    AVG(b.value),
                    b.sample_date,
                    b.interval_no,
                    b.tag,
                    datetime('now')
                FROM "{stage}" b
                WHERE NOT EXISTS (
                    SELECT 1 FROM "{table}" s
                    WHERE s.series_id = b.series_id
                      AND s.sample_date = b.sample_date
                      AND s.interval_no = b.interval_no
                      AND s.tag = b.tag
                )
                GROUP BY b.series_id, b.sample_date, b.interval_no, b.tag
                "#
            ),
            [],
        )?;
        Ok(merged)
    }

    /// Empties the staging table after a successful merge. Returns the
    /// number of cleared rows.
    pub fn clear_stage(&self, series_type: &str) -> StoreResult<usize> {
        let stage = stage_table_name(series_type)?;
        let cleared = self.conn.execute(&format!(r#"DELETE FROM "{stage}""#), [])?;
        Ok(cleared)
    }

    /// Row count helper for operational checks and tests.
    pub fn table_rows(&self, table: &str) -> StoreResult<i64> {
        let table = check_table_name(table)?;
        let count = self.conn.query_row(
            &format!(r#"SELECT COUNT(*) FROM "{table}""#),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn key_id_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SeriesKey, SeriesId)> {
    let dim1: String = row.get(0)?;
    let dim2: String = row.get(1)?;
    let dim3: String = row.get(2)?;
    let element: String = row.get(3)?;
    let category: String = row.get(4)?;
    let series_type: String = row.get(5)?;
    let id: SeriesId = row.get(6)?;
    Ok((
        SeriesKey::new(&dim1, &dim2, &dim3, &element, &category, &series_type),
        id,
    ))
}

/// Fact and staging table names come from the schedule catalog; only plain
/// identifiers are allowed into SQL text.
fn check_table_name(name: &str) -> StoreResult<&str> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(StoreError::InvalidTable(name.to_string()))
    }
}

fn stage_table_name(series_type: &str) -> StoreResult<String> {
    Ok(format!("{}_stage", check_table_name(series_type)?))
}
