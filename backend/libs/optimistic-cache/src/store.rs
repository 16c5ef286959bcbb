//! Cache store contract and the in-process query cache
//!
//! The engine only talks to [`CacheStore`]. [`QueryCache`] is the in-process
//! implementation: values behind one `RwLock` so a batch of writes lands
//! atomically, observer counts per key, and a broadcast channel of
//! [`CacheEvent`]s that drives background refetches.

use crate::{CacheError, CacheKey, CacheResult, EngineConfig, Record, Shape};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Value held under one cache key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "lowercase")]
pub enum CacheValue {
    List(Vec<Record>),
    /// `None` is the cleared slot
    Single(Option<Record>),
    /// Infinite feed pages, most recent page first
    Pages(Vec<Vec<Record>>),
}

impl CacheValue {
    pub fn shape(&self) -> Shape {
        match self {
            CacheValue::List(_) => Shape::List,
            CacheValue::Single(_) => Shape::Single,
            CacheValue::Pages(_) => Shape::Pages,
        }
    }

    /// Value holding exactly one record, in the given shape
    pub fn singleton(shape: Shape, record: Record) -> Self {
        match shape {
            Shape::List => CacheValue::List(vec![record]),
            Shape::Single => CacheValue::Single(Some(record)),
            Shape::Pages => CacheValue::Pages(vec![vec![record]]),
        }
    }

    /// All records in display order
    pub fn records(&self) -> Vec<&Record> {
        match self {
            CacheValue::List(items) => items.iter().collect(),
            CacheValue::Single(record) => record.iter().collect(),
            CacheValue::Pages(pages) => pages.iter().flatten().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Change notification emitted by [`QueryCache`]
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated { key: CacheKey },
    Removed { key: CacheKey },
    /// `refetch` is set when the key had active observers
    Invalidated { key: CacheKey, refetch: bool },
}

/// Key/value store the engine patches
///
/// Implementations must be safe to share across tasks. `write_batch` should
/// apply all entries before any reader sees one of them.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheValue>;

    /// Write a value without triggering a refetch
    fn set(&self, key: &CacheKey, value: CacheValue);

    fn remove(&self, key: &CacheKey);

    /// Mark one key stale
    fn invalidate(&self, key: &CacheKey);

    /// Mark every key starting with `prefix` stale. Returns keys marked.
    fn invalidate_prefix(&self, prefix: &CacheKey) -> usize {
        self.invalidate(prefix);
        1
    }

    fn is_stale(&self, key: &CacheKey) -> bool;

    /// `None` removes the key
    fn write_batch(&self, entries: Vec<(CacheKey, Option<CacheValue>)>) {
        for (key, value) in entries {
            match value {
                Some(value) => self.set(&key, value),
                None => self.remove(&key),
            }
        }
    }

    /// Read `keys`, hand their values to `patch`, write what it returns
    ///
    /// Implementations must hold one critical section from read to write so
    /// concurrent read-modify-write cycles never lose an update. The default
    /// is only correct for single-threaded stores.
    fn update_batch(&self, keys: &[CacheKey], patch: &mut BatchPatch<'_>) {
        let current: Vec<Option<CacheValue>> = keys.iter().map(|key| self.get(key)).collect();
        self.write_batch(patch(current.as_slice()));
    }
}

/// Patch callback for [`CacheStore::update_batch`]: current values in key
/// order in, writes out (`None` removes)
pub type BatchPatch<'a> =
    dyn FnMut(&[Option<CacheValue>]) -> Vec<(CacheKey, Option<CacheValue>)> + 'a;

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    entries: HashMap<CacheKey, Entry>,
    stale: HashSet<CacheKey>,
}

impl State {
    fn apply(&mut self, entries: Vec<(CacheKey, Option<CacheValue>)>) -> Vec<CacheEvent> {
        let now = Utc::now();
        entries
            .into_iter()
            .map(|(key, value)| {
                self.stale.remove(&key);
                match value {
                    Some(value) => {
                        self.entries.insert(key.clone(), Entry { value, updated_at: now });
                        CacheEvent::Updated { key }
                    }
                    None => {
                        self.entries.remove(&key);
                        CacheEvent::Removed { key }
                    }
                }
            })
            .collect()
    }
}

/// In-process cache store
pub struct QueryCache {
    state: RwLock<State>,
    observers: Arc<DashMap<CacheKey, usize>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::with_capacity(EngineConfig::default().event_channel_capacity)
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_capacity(config.event_channel_capacity)
    }

    /// Create store with a bounded event channel
    pub fn with_capacity(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: RwLock::new(State::default()),
            observers: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Receive change events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Register an observer of `key` until the guard drops
    pub fn observe(&self, key: &CacheKey) -> ObserverGuard {
        *self.observers.entry(key.clone()).or_insert(0) += 1;
        ObserverGuard {
            key: key.clone(),
            observers: Arc::clone(&self.observers),
        }
    }

    pub fn observer_count(&self, key: &CacheKey) -> usize {
        self.observers.get(key).map(|c| *c).unwrap_or(0)
    }

    pub fn updated_at(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        self.state.read().entries.get(key).map(|e| e.updated_at)
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.state.read().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop bookkeeping nobody can read back
    ///
    /// Evicts cleared single slots and stale marks of absent keys, unless the
    /// key is observed. Returns the number of evicted entries and marks.
    pub fn prune(&self) -> usize {
        let mut state = self.state.write();
        let State { entries, stale } = &mut *state;

        let entries_before = entries.len();
        entries.retain(|key, entry| {
            !matches!(entry.value, CacheValue::Single(None)) || self.observer_count(key) > 0
        });

        let stale_before = stale.len();
        stale.retain(|key| entries.contains_key(key) || self.observer_count(key) > 0);

        let evicted = (entries_before - entries.len()) + (stale_before - stale.len());
        if evicted > 0 {
            debug!(evicted, "Cache pruned");
        }
        evicted
    }

    /// Run [`prune`](Self::prune) every `period`. Must be called inside a
    /// tokio runtime.
    pub fn spawn_pruner(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.prune();
                    }
                    None => break,
                }
            }
        })
    }

    fn emit(&self, events: Vec<CacheEvent>) {
        for event in events {
            // No receivers is fine
            let _ = self.events.send(event);
        }
    }

    fn invalidated_event(&self, key: CacheKey) -> CacheEvent {
        let refetch = self.observer_count(&key) > 0;
        CacheEvent::Invalidated { key, refetch }
    }

    /// Run `fetch` for every invalidated key that has observers
    ///
    /// Fresh values are written back and clear the stale mark; `Ok(None)`
    /// removes the key; errors leave the key stale. Must be called inside a
    /// tokio runtime.
    pub fn on_refetch<F, Fut>(self: &Arc<Self>, fetch: F) -> JoinHandle<()>
    where
        F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<Option<CacheValue>>> + Send + 'static,
    {
        let mut receiver = self.subscribe();
        let store = Arc::clone(self);
        let fetch = Arc::new(fetch);

        info!("Refetch dispatcher started");

        tokio::spawn(async move {
            loop {
                let key = match receiver.recv().await {
                    Ok(CacheEvent::Invalidated { key, refetch: true }) => key,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Refetch dispatcher lagged behind cache events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                debug!(key = %key, "Refetching invalidated key");

                match fetch(key.clone()).await {
                    Ok(Some(value)) => store.set(&key, value),
                    Ok(None) => store.remove(&key),
                    Err(e) => {
                        error!(key = %key, error = %e, "Refetch failed, key stays stale");
                    }
                }
            }

            warn!("Refetch dispatcher ended");
        })
    }
}

impl CacheStore for QueryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.state.read().entries.get(key).map(|e| e.value.clone())
    }

    fn set(&self, key: &CacheKey, value: CacheValue) {
        self.write_batch(vec![(key.clone(), Some(value))]);
    }

    fn remove(&self, key: &CacheKey) {
        self.write_batch(vec![(key.clone(), None)]);
    }

    fn invalidate(&self, key: &CacheKey) {
        self.state.write().stale.insert(key.clone());
        debug!(key = %key, "Cache key invalidated");
        let event = self.invalidated_event(key.clone());
        self.emit(vec![event]);
    }

    fn invalidate_prefix(&self, prefix: &CacheKey) -> usize {
        let marked: Vec<CacheKey> = {
            let mut state = self.state.write();
            let mut marked: Vec<CacheKey> = state
                .entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            if !marked.contains(prefix) {
                marked.push(prefix.clone());
            }
            for key in &marked {
                state.stale.insert(key.clone());
            }
            marked
        };

        debug!(prefix = %prefix, count = marked.len(), "Cache prefix invalidated");
        let count = marked.len();
        let events = marked
            .into_iter()
            .map(|key| self.invalidated_event(key))
            .collect();
        self.emit(events);
        count
    }

    fn is_stale(&self, key: &CacheKey) -> bool {
        self.state.read().stale.contains(key)
    }

    fn write_batch(&self, entries: Vec<(CacheKey, Option<CacheValue>)>) {
        if entries.is_empty() {
            return;
        }

        let events = {
            let mut state = self.state.write();
            state.apply(entries)
        };

        debug!(count = events.len(), "Cache batch written");
        self.emit(events);
    }

    fn update_batch(&self, keys: &[CacheKey], patch: &mut BatchPatch<'_>) {
        let events = {
            let mut state = self.state.write();
            let current: Vec<Option<CacheValue>> = keys
                .iter()
                .map(|key| state.entries.get(key).map(|e| e.value.clone()))
                .collect();
            let writes = patch(current.as_slice());
            state.apply(writes)
        };

        if !events.is_empty() {
            debug!(count = events.len(), "Cache batch updated");
            self.emit(events);
        }
    }
}

/// Keeps a key observed while alive
pub struct ObserverGuard {
    key: CacheKey,
    observers: Arc<DashMap<CacheKey, usize>>,
}

impl ObserverGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        let emptied = match self.observers.get_mut(&self.key) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if emptied {
            self.observers.remove_if(&self.key, |_, count| *count == 0);
        }
    }
}

/// Adapter turning a refetch error message into a [`CacheError`]
pub fn refetch_error(key: &CacheKey, reason: impl Into<String>) -> CacheError {
    CacheError::RefetchFailed {
        key: key.to_string(),
        reason: reason.into(),
    }
}
