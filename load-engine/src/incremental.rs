use chrono::NaiveDate;
use log::{error, info, warn};

use core_types::MeasurementRecord;
use storage::{SampleBatch, Store, StoreError};

/// Result of one incremental pass over a file's records.
#[derive(Debug, Default, PartialEq)]
pub struct DeltaOutcome {
    /// Sample rows actually written.
    pub rows_inserted: usize,
    /// Intervals each record was asked to contribute (zero on a rerun with
    /// no new data).
    pub count_to_insert: i64,
    /// Sum over the loaded records' samples, for the reconciliation flow.
    pub value_total: f64,
}

/// Inserts the intervals past the day's watermark, one batched insert per
/// record. Assumes intervals are appended in order and never revised; a
/// corrected file for an already-loaded day would undercount.
///
/// Per-record failures (unresolved id, store write error) are logged and
/// skipped so one bad record never aborts the file.
pub fn load_delta(
    store: &mut Store,
    records: &[MeasurementRecord],
    day: NaiveDate,
    series_type: &str,
) -> Result<DeltaOutcome, StoreError> {
    if records.is_empty() {
        return Ok(DeltaOutcome::default());
    }
    store.ensure_series_table(series_type)?;

    let last_interval = store.last_interval(series_type, day)?;
    let record_intervals = records[0].interval_count() as i64;
    let start = last_interval + 1;
    let count_to_insert = if last_interval >= 0 {
        (record_intervals - 1) - last_interval
    } else {
        record_intervals
    };

    let mut outcome = DeltaOutcome {
        count_to_insert: count_to_insert.max(0),
        ..DeltaOutcome::default()
    };

    for record in records {
        if !record.is_valid() {
            continue;
        }
        if !record.is_resolved() {
            warn!(
                "skipping unresolved record {} on {} ({})",
                record.header_string(),
                day,
                series_type
            );
            continue;
        }
        if (record.interval_count() as i64) < start + count_to_insert {
            warn!(
                "record {} covers {} intervals, need {} on {} ({})",
                record.header_string(),
                record.interval_count(),
                start + count_to_insert,
                day,
                series_type
            );
            continue;
        }

        outcome.value_total += record.total();
        if count_to_insert <= 0 {
            continue;
        }

        let mut batch = SampleBatch::with_capacity(count_to_insert as usize);
        crate::expand_record(&mut batch, record, day, start, count_to_insert);
        match store.insert_samples(series_type, &batch) {
            Ok(inserted) => outcome.rows_inserted += inserted,
            Err(err) => {
                error!(
                    "failed to load record {} on {} ({}): {err}",
                    record.header_string(),
                    day,
                    series_type
                );
            }
        }
    }

    info!(
        "inserted {} sample rows for {} on {}",
        outcome.rows_inserted, series_type, day
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, record_with_id};

    const SERIES: &str = "lp_feeder";

    #[test]
    fn first_run_inserts_all_intervals() {
        let mut store = Store::open_in_memory().unwrap();
        let record = record_with_id("A,B,C,EL,IN,1.0,2.0,3.0,", SERIES, day(), 5);
        let outcome = load_delta(&mut store, &[record], day(), SERIES).unwrap();
        assert_eq!(outcome.rows_inserted, 3);
        assert_eq!(outcome.count_to_insert, 3);
        assert_eq!(outcome.value_total, 6.0);
        assert_eq!(store.last_interval(SERIES, day()).unwrap(), 2);
    }

    #[test]
    fn second_run_with_no_new_data_is_a_zero_delta() {
        let mut store = Store::open_in_memory().unwrap();
        let record = record_with_id("A,B,C,EL,IN,1.0,2.0,3.0,", SERIES, day(), 5);
        load_delta(&mut store, &[record.clone()], day(), SERIES).unwrap();

        let rerun = load_delta(&mut store, &[record], day(), SERIES).unwrap();
        assert_eq!(rerun.count_to_insert, 0);
        assert_eq!(rerun.rows_inserted, 0);
        // Totals are still reported for reconciliation.
        assert_eq!(rerun.value_total, 6.0);
        assert_eq!(store.table_rows(SERIES).unwrap(), 3);
    }

    #[test]
    fn grown_file_contributes_only_the_new_intervals() {
        let mut store = Store::open_in_memory().unwrap();
        let early = record_with_id("A,B,C,EL,IN,1.0,2.0,", SERIES, day(), 5);
        load_delta(&mut store, &[early], day(), SERIES).unwrap();

        let grown = record_with_id("A,B,C,EL,IN,1.0,2.0,4.0,8.0,", SERIES, day(), 5);
        let outcome = load_delta(&mut store, &[grown], day(), SERIES).unwrap();
        assert_eq!(outcome.count_to_insert, 2);
        assert_eq!(outcome.rows_inserted, 2);
        assert_eq!(store.last_interval(SERIES, day()).unwrap(), 3);
        assert_eq!(store.day_sum(SERIES, day()).unwrap(), 15.0);
    }

    #[test]
    fn unresolved_and_invalid_records_are_skipped() {
        let mut store = Store::open_in_memory().unwrap();
        let unresolved = record_with_id("A,B,C,EL,IN,1.0,2.0,", SERIES, day(), 0);
        let invalid = record_with_id("[NA],B,C,EL,IN,1.0,2.0,", SERIES, day(), 9);
        let loaded = record_with_id("D,E,F,EL,IN,1.0,2.0,", SERIES, day(), 9);
        let outcome =
            load_delta(&mut store, &[unresolved, invalid, loaded], day(), SERIES).unwrap();
        assert_eq!(outcome.rows_inserted, 2);
        assert_eq!(outcome.value_total, 3.0);
        assert_eq!(store.table_rows(SERIES).unwrap(), 2);
    }

    #[test]
    fn short_record_is_skipped_not_fatal() {
        let mut store = Store::open_in_memory().unwrap();
        let sized = record_with_id("A,B,C,EL,IN,1.0,2.0,3.0,", SERIES, day(), 5);
        let short = record_with_id("D,E,F,EL,IN,1.0,", SERIES, day(), 6);
        let outcome = load_delta(&mut store, &[sized, short], day(), SERIES).unwrap();
        assert_eq!(outcome.rows_inserted, 3);
        assert_eq!(store.table_rows(SERIES).unwrap(), 3);
    }
}
