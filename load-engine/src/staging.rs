// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::time::Instant;

use chrono::NaiveDate;
use log::info;

use core_types::MeasurementRecord;
use storage::{SampleBatch, Store, StoreError};

/// Stage-and-merge loader for the high-volume series type.
///
/// Lifecycle is stage -> merge -> clear_stage, always in that order. When
/// the merge fails the stage must not be cleared, so the staged rows remain
/// available for a retry; callers express that by propagating the merge
/// error before calling [`StageLoader::clear_stage`].
pub struct StageLoader<'a> {
    store: &'a mut Store,
    series_type: &'a str,
    chunk_rows: usize,
}

impl<'a> StageLoader<'a> {
    pub fn new(
        store: &'a mut Store,
        series_type: &'a str,
        chunk_rows: usize,
    ) -> Result<Self, StoreError> {
        store.ensure_series_table(series_type)?;
        store.ensure_stage_table(series_type)?;
        Ok(Self {
            store,
            series_type,
            chunk_rows,
        })
    }

    /// Expands `count` intervals from `start` for every loadable record into
    /// a columnar buffer and writes it to the staging table in bounded
    /// chunks. Returns the number of staged rows.
    pub fn stage(
        &mut self,
        records: &[MeasurementRecord],
        day: NaiveDate,
        start: i64,
        count: i64,
    ) -> Result<usize, StoreError> {
        let started = Instant::now();
        let mut batch = SampleBatch::with_capacity(records.len() * count.max(0) as usize);
        for record in records {
            if !record.is_valid() || !record.is_resolved() {
                continue;
            }
            if (record.interval_count() as i64) < start + count {
                continue;
            }
            crate::expand_record(&mut batch, record, day, start, count);
        }
        info!(
            "staging {} rows for {} on {}",
            batch.len(),
            self.series_type,
            day
        );
        let staged = self
            .store
            .insert_stage_rows(self.series_type, &batch, self.chunk_rows)?;
        info!(
            "staged {staged} rows in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok(staged)
    }

    /// Merges staged rows into the fact table; idempotent by construction.
    pub fn merge(&mut self) -> Result<usize, StoreError> {
        self.store.merge_stage(self.series_type)
    }

    /// Truncates the staging table after a successful merge so a rerun
    /// starts from an empty stage.
    pub fn clear_stage(&mut self) -> Result<usize, StoreError> {
        self.store.clear_stage(self.series_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, record_with_id};

    const SERIES: &str = "lp_meter";

    fn records() -> Vec<MeasurementRecord> {
        vec![
            record_with_id("A,B,C,M1,IN,1.0,2.0,3.0,", SERIES, day(), 11),
            record_with_id("A,B,C,M2,IN,4.0,5.0,6.0,", SERIES, day(), 12),
            // Unresolved, never staged.
            record_with_id("A,B,C,M3,IN,7.0,8.0,9.0,", SERIES, day(), 0),
        ]
    }

    fn run_full_cycle(store: &mut Store) -> usize {
        let records = records();
        let mut loader = StageLoader::new(store, SERIES, 2).unwrap();
        loader.stage(&records, day(), 0, 3).unwrap();
        let merged = loader.merge().unwrap();
        loader.clear_stage().unwrap();
        merged
    }

    #[test]
    fn stage_expands_only_loadable_records() {
        let mut store = Store::open_in_memory().unwrap();
        let records = records();
        let mut loader = StageLoader::new(&mut store, SERIES, 2).unwrap();
        let staged = loader.stage(&records, day(), 0, 3).unwrap();
        assert_eq!(staged, 6);
        assert_eq!(store.table_rows("lp_meter_stage").unwrap(), 6);
    }

    #[test]
    fn full_cycle_loads_the_day_once() {
        let mut store = Store::open_in_memory().unwrap();
        let merged = run_full_cycle(&mut store);
        assert_eq!(merged, 6);
        assert_eq!(store.table_rows(SERIES).unwrap(), 6);
        assert_eq!(store.day_sum(SERIES, day()).unwrap(), 21.0);
        assert_eq!(store.table_rows("lp_meter_stage").unwrap(), 0);
    }

    #[test]
    fn rerunning_the_cycle_never_double_counts() {
        let mut store = Store::open_in_memory().unwrap();
        let first = run_full_cycle(&mut store);
        assert_eq!(first, 6);
        let second = run_full_cycle(&mut store);
        assert_eq!(second, 0);
        assert_eq!(store.table_rows(SERIES).unwrap(), 6);
        assert_eq!(store.day_sum(SERIES, day()).unwrap(), 21.0);
    }

    #[test]
    fn short_coverage_is_left_out_of_the_stage() {
        let mut store = Store::open_in_memory().unwrap();
        let records = vec![
            record_with_id("A,B,C,M1,IN,1.0,2.0,3.0,", SERIES, day(), 11),
            record_with_id("A,B,C,M2,IN,4.0,", SERIES, day(), 12),
        ];
        let mut loader = StageLoader::new(&mut store, SERIES, 50_000).unwrap();
        let staged = loader.stage(&records, day(), 0, 3).unwrap();
        assert_eq!(staged, 3);
    }
}
