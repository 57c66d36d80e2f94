// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Surrogate identity assigned once per natural key by the series catalog.
pub type SeriesId = i64;

/// Sentinel for a key the catalog could not resolve. Records carrying it are
/// kept for diagnostics but never persisted.
pub const UNRESOLVED_SERIES: SeriesId = 0;

/// Width of one measurement interval.
pub const INTERVAL_MINUTES: i64 = 15;

/// Intervals in a complete day at 15-minute granularity.
pub const INTERVALS_PER_DAY: usize = 96;

/// Category literal written to the catalog when a missing key is created.
pub const SERIES_CATEGORY: &str = "LoadProfile";

/// Timestamp of the sample at `interval` within `day`.
pub fn interval_timestamp(day: NaiveDate, interval: i64) -> NaiveDateTime {
    day.and_hms_opt(0, 0, 0).unwrap() + Duration::minutes(interval * INTERVAL_MINUTES)
}

/// Compound natural key identifying one logical time series: three breakdown
/// dimensions, an element identifier, a category, and the series type.
/// Comparison is case-insensitive via [`SeriesKey::cache_key`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesKey {
    pub dim1: String,
    pub dim2: String,
    pub dim3: String,
    pub element: String,
    pub category: String,
    pub series_type: String,
}

impl SeriesKey {
    /// Builds a key from raw fields. Fields are trimmed; an empty third
    /// dimension normalizes to `-` so the joined form stays unambiguous.
    pub fn new(
        dim1: &str,
        dim2: &str,
        dim3: &str,
        element: &str,
        category: &str,
        series_type: &str,
    ) -> Self {
        let dim3 = dim3.trim();
        Self {
            dim1: dim1.trim().to_string(),
            dim2: dim2.trim().to_string(),
            dim3: if dim3.is_empty() { "-" } else { dim3 }.to_string(),
            element: element.trim().to_string(),
            category: category.trim().to_string(),
            series_type: series_type.trim().to_string(),
        }
    }

    /// Case-folded joined form used as the identity-map key.
    pub fn cache_key(&self) -> String {
        format!(
            "{}*{}*{}*{}*{}*{}",
            self.dim1, self.dim2, self.dim3, self.element, self.category, self.series_type
        )
        .to_uppercase()
    }
}

/// Seam between the parser and the identity cache. Implementations must not
/// panic; an unresolvable key yields [`UNRESOLVED_SERIES`].
pub trait SeriesResolver {
    fn resolve(&self, key: &SeriesKey) -> SeriesId;
}

/// One row of the ingest schedule catalog: a file-name pattern with a
/// `YYYYMMDD` placeholder, the directory the feed drops files into, and the
/// series type (which also names the fact table).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub file_pattern: String,
    pub source_dir: String,
    pub series_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_case_folded() {
        let a = SeriesKey::new("norte", "Alta", "z1", "F12", "In", "lp_feeder");
        let b = SeriesKey::new("NORTE", "ALTA", "Z1", "f12", "IN", "LP_FEEDER");
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn empty_third_dimension_normalizes() {
        let key = SeriesKey::new("a", "b", "  ", "el", "in", "t");
        assert_eq!(key.dim3, "-");
        assert_eq!(key.cache_key(), "A*B*-*EL*IN*T");
    }

    #[test]
    fn interval_timestamps_step_by_fifteen_minutes() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let ts0 = interval_timestamp(day, 0);
        let ts5 = interval_timestamp(day, 5);
        assert_eq!(ts0, day.and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(ts5 - ts0, Duration::minutes(75));
    }
}
