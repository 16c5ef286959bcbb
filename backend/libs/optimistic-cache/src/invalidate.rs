//! Invalidation

use crate::metrics::EngineMetrics;
use crate::{CacheStore, InvalidationMode, KeyFactory, KeySet, Record, SyncEngine};
use tracing::debug;

impl SyncEngine {
    /// Mark every key the descriptor reaches stale
    ///
    /// Returns the number of stored keys marked.
    pub fn invalidate_keys<S, F>(&self, store: &S, factory: &F, entity: &Record) -> usize
    where
        S: CacheStore + ?Sized,
        F: KeyFactory + ?Sized,
    {
        self.invalidate_key_set(store, &factory.keys(entity))
    }

    /// Invalidate an already computed key set
    pub fn invalidate_key_set<S>(&self, store: &S, key_set: &KeySet) -> usize
    where
        S: CacheStore + ?Sized,
    {
        let mut marked = 0;

        for key in key_set.keys() {
            marked += match self.config.invalidation_mode {
                InvalidationMode::Exact => {
                    store.invalidate(key);
                    1
                }
                InvalidationMode::Prefix => store.invalidate_prefix(key),
            };
            EngineMetrics::record_invalidation(key);
        }

        debug!(
            keys = key_set.len(),
            marked,
            mode = ?self.config.invalidation_mode,
            "Cache keys invalidated"
        );
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factories::AdKeys;
    use crate::{CacheKey, CacheValue, EngineConfig, QueryCache};

    fn ad() -> Record {
        Record::new().with("id", "a1").with("profile_id", "u1")
    }

    #[test]
    fn test_every_key_marked_stale() {
        let store = QueryCache::new();
        let engine = SyncEngine::default();

        engine.invalidate_keys(&store, &AdKeys, &ad());

        for key in AdKeys.keys(&ad()).keys() {
            assert!(store.is_stale(key), "{key} not stale");
        }
    }

    #[test]
    fn test_prefix_mode_reaches_nested_keys() {
        let store = QueryCache::new();
        let nested = CacheKey::new(["ads", "category", "cars"]);
        store.set(&nested, CacheValue::List(vec![]));

        SyncEngine::default().invalidate_keys(&store, &AdKeys, &ad());
        assert!(store.is_stale(&nested));
    }

    #[test]
    fn test_exact_mode_leaves_nested_keys() {
        let store = QueryCache::new();
        let nested = CacheKey::new(["ads", "category", "cars"]);
        store.set(&nested, CacheValue::List(vec![]));

        let engine = SyncEngine::new(EngineConfig {
            invalidation_mode: InvalidationMode::Exact,
            ..EngineConfig::default()
        });
        let marked = engine.invalidate_keys(&store, &AdKeys, &ad());

        assert_eq!(marked, AdKeys.keys(&ad()).len());
        assert!(!store.is_stale(&nested));
    }
}
