// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Identity cache mapping natural series keys to surrogate ids.
//!
//! The cache preloads the whole series catalog once per process, then
//! extends itself lazily: a miss inserts a new catalog row (surrogate id
//! allocated by the store), reloads the rows matching that key, and
//! re-resolves. A uniqueness conflict on the insert means another resolver
//! created the key first; the keyed reload picks its id up either way.

use std::collections::HashMap;

use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use core_types::{SeriesId, SeriesKey, SeriesResolver, SERIES_CATEGORY, UNRESOLVED_SERIES};
use storage::{Store, StoreError};

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("store error while resolving {key}: {source}")]
    Store { key: String, source: StoreError },
    #[error("series {key} still absent after insert and reload")]
    StillMissing { key: String },
}

/// Preloaded, lazily-extended natural-key -> surrogate-id map. Constructed
/// once at startup and passed by reference to every consumer; the map lock
/// is held across the whole miss/insert/reload sequence so the sequence
/// stays atomic with respect to other resolvers in this process.
pub struct SeriesCache {
    ids: Mutex<HashMap<String, SeriesId>>,
}

impl SeriesCache {
    /// One full catalog scan building the case-insensitive map. Must
    /// complete before any parser resolves a key.
    pub fn preload(store: &Store) -> Result<Self, StoreError> {
        let mut ids = HashMap::new();
        for (key, id) in store.scan_catalog()? {
            ids.entry(key.cache_key()).or_insert(id);
        }
        info!("preloaded {} series identities", ids.len());
        Ok(Self {
            ids: Mutex::new(ids),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    /// Resolves `key` to its surrogate id, creating the catalog row on a
    /// miss. Fails only if both the insert and the keyed reload leave the
    /// key absent.
    pub fn resolve(&self, store: &Store, key: &SeriesKey) -> Result<SeriesId, ResolutionError> {
        let cache_key = key.cache_key();
        let mut ids = self.ids.lock();
        if let Some(&id) = ids.get(&cache_key) {
            return Ok(id);
        }

        store
            .insert_catalog_entry(key, SERIES_CATEGORY)
            .map_err(|source| ResolutionError::Store {
                key: cache_key.clone(),
                source,
            })?;
        let found = store
            .find_catalog_entries(key, SERIES_CATEGORY)
            .map_err(|source| ResolutionError::Store {
                key: cache_key.clone(),
                source,
            })?;
        for (reloaded, id) in found {
            ids.entry(reloaded.cache_key()).or_insert(id);
        }

        ids.get(&cache_key)
            .copied()
            .ok_or(ResolutionError::StillMissing { key: cache_key })
    }
}

/// The injectable resolver handed to the record parser. Resolution failures
/// are logged and collapse to the unresolved sentinel so a parse never
/// aborts on a bad key.
pub struct CatalogResolver<'a> {
    cache: &'a SeriesCache,
    store: &'a Store,
}

impl<'a> CatalogResolver<'a> {
    pub fn new(cache: &'a SeriesCache, store: &'a Store) -> Self {
        Self { cache, store }
    }
}

impl SeriesResolver for CatalogResolver<'_> {
    fn resolve(&self, key: &SeriesKey) -> SeriesId {
        match self.cache.resolve(self.store, key) {
            Ok(id) => id,
            Err(err) => {
                warn!("unresolved series: {err}");
                UNRESOLVED_SERIES
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_key(dim1: &str) -> SeriesKey {
        SeriesKey::new(dim1, "hv", "z1", "F12", SERIES_CATEGORY, "lp_feeder")
    }

    #[test]
    fn resolve_is_stable_across_calls() {
        let store = Store::open_in_memory().unwrap();
        let cache = SeriesCache::preload(&store).unwrap();
        let key = profile_key("north");
        let first = cache.resolve(&store, &key).unwrap();
        let second = cache.resolve(&store, &key).unwrap();
        assert!(first > 0);
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_survives_a_cache_rebuild() {
        let store = Store::open_in_memory().unwrap();
        let key = profile_key("north");
        let first = {
            let cache = SeriesCache::preload(&store).unwrap();
            cache.resolve(&store, &key).unwrap()
        };
        let rebuilt = SeriesCache::preload(&store).unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt.resolve(&store, &key).unwrap(), first);
    }

    #[test]
    fn case_variants_resolve_to_the_same_id() {
        let store = Store::open_in_memory().unwrap();
        let cache = SeriesCache::preload(&store).unwrap();
        let lower = SeriesKey::new("north", "hv", "z1", "f12", SERIES_CATEGORY, "lp_feeder");
        let upper = SeriesKey::new("NORTH", "HV", "Z1", "F12", SERIES_CATEGORY, "LP_FEEDER");
        let a = cache.resolve(&store, &lower).unwrap();
        let b = cache.resolve(&store, &upper).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.scan_catalog().unwrap().len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_ids() {
        let store = Store::open_in_memory().unwrap();
        let cache = SeriesCache::preload(&store).unwrap();
        let a = cache.resolve(&store, &profile_key("north")).unwrap();
        let b = cache.resolve(&store, &profile_key("south")).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn category_other_than_literal_stays_unresolved() {
        // The catalog row is created under the fixed category literal, so a
        // key carrying any other category cannot be found by the keyed
        // reload and must surface as still-missing, not as a panic.
        let store = Store::open_in_memory().unwrap();
        let cache = SeriesCache::preload(&store).unwrap();
        let key = SeriesKey::new("north", "hv", "z1", "F12", "OTHER", "lp_feeder");
        let err = cache.resolve(&store, &key).unwrap_err();
        assert!(matches!(err, ResolutionError::StillMissing { .. }));

        let resolver = CatalogResolver::new(&cache, &store);
        assert_eq!(resolver.resolve(&key), UNRESOLVED_SERIES);
    }
}
