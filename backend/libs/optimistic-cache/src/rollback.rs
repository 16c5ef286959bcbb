//! Snapshot and rollback

use crate::metrics::EngineMetrics;
use crate::patch::revert_value;
use crate::{CacheKey, CacheStore, CacheValue, OperationKind, Record, SyncEngine};
use std::collections::BTreeMap;
use tracing::info;

/// Pre-mutation values of every key an optimistic update reached
///
/// `None` records that the key was absent. Keys the update actually changed
/// also carry the value it wrote. Lives for one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    entity: Record,
    kind: OperationKind,
    previous: BTreeMap<CacheKey, Option<CacheValue>>,
    written: BTreeMap<CacheKey, CacheValue>,
}

impl Snapshot {
    pub(crate) fn new(
        entity: Record,
        kind: OperationKind,
        previous: BTreeMap<CacheKey, Option<CacheValue>>,
        written: BTreeMap<CacheKey, CacheValue>,
    ) -> Self {
        Self {
            entity,
            kind,
            previous,
            written,
        }
    }

    /// The record as applied, including any assigned placeholder id
    pub fn entity(&self) -> &Record {
        &self.entity
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.previous.keys()
    }

    /// Keys the update wrote to
    pub fn patched_keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.written.keys()
    }

    /// Value before the update; `Some(None)` means the key was absent
    pub fn previous(&self, key: &CacheKey) -> Option<&Option<CacheValue>> {
        self.previous.get(key)
    }

    /// Value the update wrote, `None` for untouched keys
    pub fn written(&self, key: &CacheKey) -> Option<&CacheValue> {
        self.written.get(key)
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

impl SyncEngine {
    /// Undo a snapshotted update. Idempotent; `None` is a no-op.
    ///
    /// Only keys the update wrote are touched. A key still holding the written
    /// value gets its previous value back verbatim. A key another write has
    /// changed since keeps that write, and only this entity's record is
    /// reverted inside it.
    ///
    /// Returns the number of keys written.
    pub fn rollback_cache<S>(&self, store: &S, snapshot: Option<&Snapshot>) -> usize
    where
        S: CacheStore + ?Sized,
    {
        let Some(snapshot) = snapshot else {
            return 0;
        };
        if snapshot.written.is_empty() {
            return 0;
        }

        let keys: Vec<CacheKey> = snapshot.written.keys().cloned().collect();
        let mut restored = Vec::new();
        let mut merged = 0;

        store.update_batch(&keys, &mut |current| {
            restored.clear();
            merged = 0;

            let mut writes = Vec::new();
            for ((key, written), current) in snapshot.written.iter().zip(current) {
                let previous = snapshot.previous.get(key).and_then(Option::as_ref);

                let next = if current.as_ref() == Some(written) {
                    Some(previous.cloned())
                } else {
                    let reverted =
                        revert_value(current.as_ref(), previous, &snapshot.entity, snapshot.kind);
                    merged += usize::from(reverted.is_some());
                    reverted
                };

                if let Some(next) = next {
                    restored.push(key.clone());
                    writes.push((key.clone(), next));
                }
            }
            writes
        });

        for key in &restored {
            EngineMetrics::record_rollback(key);
        }

        info!(
            kind = %snapshot.kind,
            keys = restored.len(),
            merged,
            "Optimistic update rolled back"
        );
        restored.len()
    }
}
