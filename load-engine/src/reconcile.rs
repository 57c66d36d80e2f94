use chrono::NaiveDate;
use log::warn;

use storage::{Store, StoreError};

/// Compares the file total against the stored total for the day, both
/// rounded to two decimals. A mismatch is a drift signal only: it is warned
/// with both values and never blocks or reverses a load.
pub fn check(
    store: &Store,
    file_total: f64,
    day: NaiveDate,
    series_type: &str,
) -> Result<bool, StoreError> {
    let stored_total = store.day_sum(series_type, day)?;
    let matched = round2(file_total) == round2(stored_total);
    if !matched {
        warn!(
            "totals differ for {} on {}: store {:.2} | file {:.2}",
            series_type, day, stored_total, file_total
        );
    }
    Ok(matched)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, record_with_id};

    const SERIES: &str = "lp_feeder";

    fn loaded_store(samples: &str) -> Store {
        let mut store = Store::open_in_memory().unwrap();
        let record = record_with_id(&format!("A,B,C,EL,IN,{samples}"), SERIES, day(), 3);
        crate::load_delta(&mut store, &[record], day(), SERIES).unwrap();
        store
    }

    #[test]
    fn matching_totals_reconcile() {
        let store = loaded_store("100.0,23.45,");
        assert!(check(&store, 123.45, day(), SERIES).unwrap());
    }

    #[test]
    fn a_cent_of_drift_is_a_mismatch() {
        let store = loaded_store("100.0,23.45,");
        assert!(!check(&store, 123.46, day(), SERIES).unwrap());
    }

    #[test]
    fn sub_cent_noise_is_tolerated() {
        let store = loaded_store("100.0,23.45,");
        assert!(check(&store, 123.4504, day(), SERIES).unwrap());
    }

    #[test]
    fn empty_day_reconciles_against_zero() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_series_table(SERIES).unwrap();
        assert!(check(&store, 0.0, day(), SERIES).unwrap());
        assert!(!check(&store, 1.0, day(), SERIES).unwrap());
    }
}
