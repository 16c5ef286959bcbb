//! Optimistic update
//!
//! Applies a speculative add/update/remove to every key the key factory
//! reaches and returns the snapshot needed to undo it.

use crate::metrics::EngineMetrics;
use crate::patch::patch_value;
use crate::{
    ById, CacheKey, CacheStore, IdentityComparator, KeyFactory, OperationKind, Record, Snapshot, SyncEngine,
};
use std::collections::BTreeMap;
use tracing::debug;

impl SyncEngine {
    /// Optimistic update matching records by `id`
    pub fn optimistic_update<S, F>(
        &self,
        store: &S,
        factory: &F,
        entity: &Record,
        kind: OperationKind,
    ) -> Snapshot
    where
        S: CacheStore + ?Sized,
        F: KeyFactory + ?Sized,
    {
        self.optimistic_update_with(store, factory, entity, kind, &ById)
    }

    /// Optimistic update with a caller-supplied identity comparator
    ///
    /// Reads, patches and writes every reached key inside one
    /// [`CacheStore::update_batch`], so readers never see a half-patched key
    /// set and concurrent updates never overwrite each other.
    pub fn optimistic_update_with<S, F, I>(
        &self,
        store: &S,
        factory: &F,
        entity: &Record,
        kind: OperationKind,
        identity: &I,
    ) -> Snapshot
    where
        S: CacheStore + ?Sized,
        F: KeyFactory + ?Sized,
        I: IdentityComparator + ?Sized,
    {
        let entity = self.with_identity(entity, kind);
        let key_set = factory.keys(&entity);

        if key_set.is_empty() {
            debug!(
                entity = %factory.entity(),
                kind = %kind,
                "Key factory produced no keys, optimistic update skipped"
            );
        }

        let entries = key_set.entries();
        let keys: Vec<CacheKey> = entries.iter().map(|entry| entry.key.clone()).collect();
        let mut previous = BTreeMap::new();
        let mut written = BTreeMap::new();

        store.update_batch(&keys, &mut |current| {
            previous.clear();
            written.clear();

            let mut writes = Vec::new();
            for (entry, current) in entries.iter().zip(current) {
                let policy = factory.insert_policy(&entry.key, &entity, &self.config.rank_field);
                if let Some(patched) =
                    patch_value(current.as_ref(), entry.shape, &entity, kind, identity, &policy)
                {
                    written.insert(entry.key.clone(), patched.clone());
                    writes.push((entry.key.clone(), Some(patched)));
                }
                previous.insert(entry.key.clone(), current.clone());
            }
            writes
        });

        for key in written.keys() {
            EngineMetrics::record_patch(key, kind);
        }

        debug!(
            entity = %factory.entity(),
            kind = %kind,
            keys = previous.len(),
            patched = written.len(),
            "Optimistic update applied"
        );

        Snapshot::new(entity, kind, previous, written)
    }
}
