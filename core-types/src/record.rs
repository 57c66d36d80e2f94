// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::NaiveDate;
use log::warn;
use thiserror::Error;

use crate::types::{SeriesId, SeriesKey, SeriesResolver, UNRESOLVED_SERIES};

/// Delimiter of the measurement file grammar.
pub const FIELD_DELIMITER: char = ',';

/// Five header dimensions plus at least one sample.
pub const MIN_FIELDS: usize = 6;

const HEADER_FIELDS: usize = 5;

/// Marker in the first header field for rows the feed flags as not
/// applicable. Such records parse but carry no loadable id.
const NOT_APPLICABLE: char = '[';

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("line has {found} delimited fields, expected at least {min}")]
    MalformedLine { found: usize, min: usize },
}

/// One parsed measurement line: the header fields forming a [`SeriesKey`],
/// the resolved surrogate id, and one sample per 15-minute interval.
/// Immutable after parse.
#[derive(Clone, Debug)]
pub struct MeasurementRecord {
    key: SeriesKey,
    day: NaiveDate,
    series_id: SeriesId,
    samples: Vec<f64>,
}

impl MeasurementRecord {
    /// Parses one normalized line (the orchestrator guarantees a trailing
    /// delimiter). Content after the final delimiter is dropped, the rest is
    /// split on commas: five header fields, then samples. Sample fields that
    /// fail float parsing become `0.0` rather than aborting the line; the
    /// decimal point is `.` regardless of host locale.
    pub fn parse(
        line: &str,
        series_type: &str,
        day: NaiveDate,
        resolver: &dyn SeriesResolver,
    ) -> Result<Self, RecordError> {
        let raw = match line.rfind(FIELD_DELIMITER) {
            Some(pos) => &line[..pos],
            None => {
                return Err(RecordError::MalformedLine {
                    found: 1,
                    min: MIN_FIELDS,
                })
            }
        };
        let fields: Vec<&str> = raw.split(FIELD_DELIMITER).collect();
        if fields.len() < MIN_FIELDS {
            return Err(RecordError::MalformedLine {
                found: fields.len(),
                min: MIN_FIELDS,
            });
        }

        let key = SeriesKey::new(
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            fields[4],
            series_type,
        );
        let samples: Vec<f64> = fields[HEADER_FIELDS..]
            .iter()
            .map(|field| parse_sample(field))
            .collect();

        let valid = !key.dim1.contains(NOT_APPLICABLE);
        let series_id = if valid {
            resolver.resolve(&key)
        } else {
            UNRESOLVED_SERIES
        };
        if valid && series_id == UNRESOLVED_SERIES {
            warn!(
                "no series id for {} on {} ({})",
                key.cache_key(),
                day,
                series_type
            );
        }

        Ok(Self {
            key,
            day,
            series_id,
            samples,
        })
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn series_id(&self) -> SeriesId {
        self.series_id
    }

    pub fn is_resolved(&self) -> bool {
        self.series_id != UNRESOLVED_SERIES
    }

    /// Rows flagged not-applicable parse for diagnostics but are never
    /// handed to a loader.
    pub fn is_valid(&self) -> bool {
        !self.key.dim1.contains(NOT_APPLICABLE)
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn interval_count(&self) -> usize {
        self.samples.len()
    }

    /// Sum over every sample of the record.
    pub fn total(&self) -> f64 {
        self.samples.iter().sum()
    }

    /// Compact header form for failure log lines.
    pub fn header_string(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.key.dim1, self.key.dim2, self.key.dim3, self.key.element, self.key.category
        )
    }
}

fn parse_sample(field: &str) -> f64 {
    field.trim().parse().unwrap_or(0.0)
}
