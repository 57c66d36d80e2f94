// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared domain types, the interval record parser, and configuration for the
//! measurement ingestion pipeline.

pub mod config;
pub mod record;
pub mod types;

pub use config::AppConfig;
pub use record::{MeasurementRecord, RecordError, FIELD_DELIMITER, MIN_FIELDS};
pub use types::{
    interval_timestamp, ScheduleEntry, SeriesId, SeriesKey, SeriesResolver, INTERVALS_PER_DAY,
    INTERVAL_MINUTES, SERIES_CATEGORY, UNRESOLVED_SERIES,
};
