//! Reconciliation of optimistic records with backend-confirmed ones

use crate::metrics::{EngineMetrics, ReconcileOutcome};
use crate::patch::{insert, replace_value};
use crate::{
    ById, CacheKey, CacheStore, CacheValue, IdentityComparator, KeyFactory, Record, Shape,
    SyncEngine,
};
use tracing::{debug, info, warn};

/// Per-key outcome of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Keys where the optimistic record was swapped for the confirmed one
    pub replaced: Vec<CacheKey>,
    /// Keys that received the confirmed record without holding the optimistic one
    pub inserted: Vec<CacheKey>,
    /// Keys holding a value in which the optimistic record was not found
    pub missed: Vec<CacheKey>,
}

impl ReconcileReport {
    /// True when no key was touched
    pub fn is_miss(&self) -> bool {
        self.replaced.is_empty() && self.inserted.is_empty()
    }

    fn record(&mut self, key: &CacheKey, outcome: ReconcileOutcome) {
        EngineMetrics::record_reconcile(key, outcome);
        match outcome {
            ReconcileOutcome::Replaced => self.replaced.push(key.clone()),
            ReconcileOutcome::Inserted => self.inserted.push(key.clone()),
            ReconcileOutcome::Missed => self.missed.push(key.clone()),
        }
    }
}

/// Drop records still carrying the temporary id
fn purge_temp_id(value: CacheValue, temp_id: Option<&str>) -> CacheValue {
    let Some(temp_id) = temp_id else {
        return value;
    };
    let keep = |item: &Record| item.id().as_deref() != Some(temp_id);

    match value {
        CacheValue::List(items) => CacheValue::List(items.into_iter().filter(keep).collect()),
        CacheValue::Pages(pages) => CacheValue::Pages(
            pages
                .into_iter()
                .map(|page| page.into_iter().filter(keep).collect())
                .collect(),
        ),
        CacheValue::Single(Some(record)) if !keep(&record) => CacheValue::Single(None),
        single @ CacheValue::Single(_) => single,
    }
}

impl SyncEngine {
    /// Reconcile matching records by `id`
    pub fn replace_optimistic_item<S, F>(
        &self,
        store: &S,
        factory: &F,
        entity: &Record,
        new_entity: &Record,
    ) -> ReconcileReport
    where
        S: CacheStore + ?Sized,
        F: KeyFactory + ?Sized,
    {
        self.replace_optimistic_item_with(store, factory, entity, new_entity, &ById)
    }

    /// Swap the optimistic record for the confirmed one in every key either
    /// descriptor reaches
    ///
    /// Keys that never held the optimistic record are left for invalidation,
    /// unless the factory opts into appending there. The confirmed record's
    /// own single slot is filled when empty, and a temporary single slot is
    /// removed once the confirmed one is known. Runs as one
    /// [`CacheStore::update_batch`].
    pub fn replace_optimistic_item_with<S, F, I>(
        &self,
        store: &S,
        factory: &F,
        entity: &Record,
        new_entity: &Record,
        identity: &I,
    ) -> ReconcileReport
    where
        S: CacheStore + ?Sized,
        F: KeyFactory + ?Sized,
        I: IdentityComparator + ?Sized,
    {
        let optimistic_keys = factory.keys(entity);
        let confirmed_keys = factory.keys(new_entity);
        let key_set = optimistic_keys.union(&confirmed_keys);
        let confirmed_single: Vec<&CacheKey> = confirmed_keys
            .scope("single")
            .iter()
            .map(|entry| &entry.key)
            .collect();

        let new_id = new_entity.id();
        let temp_id = entity.id().filter(|id| Some(id) != new_id.as_ref());

        // Once the confirmed record has its own slot, the temporary one goes
        let retired_single: Vec<&CacheKey> = match (&temp_id, confirmed_single.is_empty()) {
            (Some(_), false) => optimistic_keys
                .scope("single")
                .iter()
                .map(|entry| &entry.key)
                .filter(|key| !confirmed_single.contains(key))
                .collect(),
            _ => Vec::new(),
        };

        let entries = key_set.entries();
        let keys: Vec<CacheKey> = entries.iter().map(|entry| entry.key.clone()).collect();
        let mut report = ReconcileReport::default();

        store.update_batch(&keys, &mut |current| {
            report = ReconcileReport::default();

            let mut writes = Vec::new();
            for (entry, current) in entries.iter().zip(current) {
                let key = &entry.key;

                let (next, outcome) = match current {
                    Some(value) => match replace_value(value, entity, new_entity, identity) {
                        Some(replaced) => (Some(replaced), Some(ReconcileOutcome::Replaced)),
                        None => match value {
                            CacheValue::List(items)
                                if factory.append_on_reconcile(key, new_entity) =>
                            {
                                let mut items = items.clone();
                                let policy =
                                    factory.insert_policy(key, new_entity, &self.config.rank_field);
                                insert(&mut items, new_entity.clone(), &policy);
                                (
                                    Some(CacheValue::List(items)),
                                    Some(ReconcileOutcome::Inserted),
                                )
                            }
                            CacheValue::Single(None) if confirmed_single.contains(&key) => (
                                Some(CacheValue::Single(Some(new_entity.clone()))),
                                Some(ReconcileOutcome::Inserted),
                            ),
                            _ => (None, Some(ReconcileOutcome::Missed)),
                        },
                    },
                    None if entry.shape == Shape::Single && confirmed_single.contains(&key) => (
                        Some(CacheValue::Single(Some(new_entity.clone()))),
                        Some(ReconcileOutcome::Inserted),
                    ),
                    None => (None, None),
                };

                if let Some(outcome) = outcome {
                    report.record(key, outcome);
                }

                if retired_single.contains(&key) {
                    if current.is_some() {
                        writes.push((key.clone(), None));
                    }
                    continue;
                }

                // Stale temporary records go even where the comparator found nothing
                let next = match (next, current) {
                    (Some(next), _) => Some(purge_temp_id(next, temp_id.as_deref())),
                    (None, Some(value)) => {
                        let purged = purge_temp_id(value.clone(), temp_id.as_deref());
                        (&purged != value).then_some(purged)
                    }
                    (None, None) => None,
                };

                if let Some(next) = next {
                    writes.push((key.clone(), Some(next)));
                }
            }
            writes
        });

        for key in &report.missed {
            debug!(key = %key, "Optimistic record not found under key");
        }

        if report.is_miss() && !key_set.is_empty() {
            warn!(
                entity = %factory.entity(),
                keys = key_set.len(),
                "Reconciliation found no optimistic record, leaving repair to invalidation"
            );
        } else {
            info!(
                entity = %factory.entity(),
                replaced = report.replaced.len(),
                inserted = report.inserted.len(),
                missed = report.missed.len(),
                "Optimistic record reconciled"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factories::{MediaLinkKeys, PostKeys};
    use crate::{ByClientId, OperationKind, QueryCache};

    fn post(id: &str) -> Record {
        Record::new().with("id", id).with("profile_id", "u1")
    }

    #[test]
    fn test_replace_in_list_and_single() {
        let store = QueryCache::new();
        let engine = SyncEngine::default();
        let user_key = CacheKey::new(["posts", "user", "u1"]);
        store.set(&user_key, CacheValue::List(vec![post("p1"), post("p0")]));
        store.set(
            &CacheKey::new(["post", "p1"]),
            CacheValue::Single(Some(post("p1"))),
        );

        let confirmed = post("p1").with("title", "final");
        let report = engine.replace_optimistic_item(&store, &PostKeys, &post("p1"), &confirmed);

        assert!(report.replaced.contains(&user_key));
        assert_eq!(
            store.get(&user_key),
            Some(CacheValue::List(vec![confirmed.clone(), post("p0")]))
        );
        assert_eq!(
            store.get(&CacheKey::new(["post", "p1"])),
            Some(CacheValue::Single(Some(confirmed)))
        );
    }

    #[test]
    fn test_missing_item_left_untouched() {
        let store = QueryCache::new();
        let engine = SyncEngine::default();
        let key = CacheKey::new(["posts", "user", "u1"]);
        store.set(&key, CacheValue::List(vec![post("other")]));

        let report = engine.replace_optimistic_item(&store, &PostKeys, &post("p1"), &post("p1"));

        assert_eq!(report.missed, vec![key.clone()]);
        assert_eq!(
            store.get(&key),
            Some(CacheValue::List(vec![post("other")]))
        );
    }

    #[test]
    fn test_new_membership_reached_through_union() {
        let store = QueryCache::new();
        let engine = SyncEngine::default();
        let group_key = CacheKey::new(["posts", "group", "g1"]);
        store.set(&group_key, CacheValue::List(vec![post("p1")]));

        // group_id only known after confirmation
        let confirmed = post("p1").with("group_id", "g1").with("title", "x");
        let report = engine.replace_optimistic_item(&store, &PostKeys, &post("p1"), &confirmed);

        assert!(report.replaced.contains(&group_key));
        assert_eq!(store.get(&group_key), Some(CacheValue::List(vec![confirmed])));
    }

    #[test]
    fn test_append_hook_inserts_confirmed() {
        let store = QueryCache::new();
        let engine = SyncEngine::default();
        let key = CacheKey::new(["media-links", "group", "g1"]);
        let existing = Record::new().with("id", "m0").with("group_id", "g1");
        store.set(&key, CacheValue::List(vec![existing.clone()]));

        let optimistic = Record::new().with("id", "tmp").with("client_id", "tmp");
        let confirmed = Record::new()
            .with("id", "m1")
            .with("client_id", "tmp")
            .with("group_id", "g1");

        let report = engine.replace_optimistic_item_with(
            &store,
            &MediaLinkKeys,
            &optimistic,
            &confirmed,
            &ByClientId,
        );

        assert_eq!(report.inserted.first(), Some(&key));
        assert_eq!(
            store.get(&key),
            Some(CacheValue::List(vec![existing, confirmed]))
        );
    }

    #[test]
    fn test_temp_id_purged_everywhere() {
        let store = QueryCache::new();
        let engine = SyncEngine::default();
        let optimistic = post("tmp-1").with("client_id", "tmp-1");
        let snapshot = engine.optimistic_update(&store, &PostKeys, &optimistic, OperationKind::Add);
        let confirmed = post("srv-42").with("client_id", "tmp-1");

        engine.replace_optimistic_item_with(
            &store,
            &PostKeys,
            snapshot.entity(),
            &confirmed,
            &ByClientId,
        );

        for key in store.keys() {
            let value = store.get(&key).unwrap();
            assert!(value
                .records()
                .iter()
                .all(|r| r.id().as_deref() != Some("tmp-1")));
        }
        assert_eq!(
            store.get(&CacheKey::new(["post", "srv-42"])),
            Some(CacheValue::Single(Some(confirmed)))
        );
    }

    #[test]
    fn test_temporary_single_slot_removed() {
        let store = QueryCache::new();
        let engine = SyncEngine::default();
        let optimistic = post("tmp-1").with("client_id", "tmp-1");
        engine.optimistic_update(&store, &PostKeys, &optimistic, OperationKind::Add);
        assert!(store.get(&CacheKey::new(["post", "tmp-1"])).is_some());

        let confirmed = post("srv-42").with("client_id", "tmp-1");
        let report = engine.replace_optimistic_item_with(
            &store,
            &PostKeys,
            &optimistic,
            &confirmed,
            &ByClientId,
        );

        assert!(!report.is_miss());
        assert!(store.get(&CacheKey::new(["post", "tmp-1"])).is_none());
        assert_eq!(
            store.get(&CacheKey::new(["post", "srv-42"])),
            Some(CacheValue::Single(Some(confirmed.clone())))
        );
        assert_eq!(
            store.get(&CacheKey::new(["posts", "user", "u1"])),
            Some(CacheValue::List(vec![confirmed]))
        );
    }

    #[test]
    fn test_same_id_keeps_single_slot() {
        let store = QueryCache::new();
        let engine = SyncEngine::default();
        let key = CacheKey::new(["post", "p1"]);
        store.set(&key, CacheValue::Single(Some(post("p1"))));

        let confirmed = post("p1").with("title", "done");
        engine.replace_optimistic_item(&store, &PostKeys, &post("p1"), &confirmed);

        assert_eq!(store.get(&key), Some(CacheValue::Single(Some(confirmed))));
    }
}
