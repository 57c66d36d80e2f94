// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Loaders moving parsed measurement records into the store.
//!
//! Two volume tiers: [`incremental::load_delta`] issues one batched insert
//! per record covering only the intervals past the day's watermark, while
//! [`StageLoader`] bulk-writes a whole day into a staging table and merges
//! it into the fact table with an existence check. [`reconcile::check`]
//! compares the file total against the stored total afterwards.

pub mod incremental;
pub mod reconcile;
pub mod staging;

pub use incremental::{load_delta, DeltaOutcome};
pub use staging::StageLoader;

use chrono::NaiveDate;
use core_types::MeasurementRecord;
use storage::SampleBatch;

/// Expands `count` intervals of `record` starting at `start` into sample
/// rows appended to `batch`. Callers guarantee the record covers the range.
pub(crate) fn expand_record(
    batch: &mut SampleBatch,
    record: &MeasurementRecord,
    day: NaiveDate,
    start: i64,
    count: i64,
) {
    let samples = record.samples();
    for offset in 0..count {
        let interval = start + offset;
        batch.push_row(
            record.series_id(),
            core_types::interval_timestamp(day, interval),
            samples[interval as usize],
            day,
            interval,
            &record.key().element,
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;
    use core_types::{MeasurementRecord, SeriesId, SeriesKey, SeriesResolver};

    struct StubResolver {
        id: SeriesId,
    }

    impl SeriesResolver for StubResolver {
        fn resolve(&self, _key: &SeriesKey) -> SeriesId {
            self.id
        }
    }

    /// Parses a record line against a resolver that always answers `id`.
    pub fn record_with_id(line: &str, series_type: &str, day: NaiveDate, id: SeriesId) -> MeasurementRecord {
        let resolver = StubResolver { id };
        MeasurementRecord::parse(line, series_type, day, &resolver).unwrap()
    }

    pub fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }
}
