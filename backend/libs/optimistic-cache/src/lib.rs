//! Nova optimistic cache synchronization layer
//!
//! Keeps every cached view of a record consistent across optimistic
//! mutations with:
//! - Per-entity key factories with disjoint key roots
//! - Optimistic add/update/remove across list, single and paged views
//! - Rollback from snapshots that leaves concurrent mutations intact
//! - Reconciliation of placeholder records with confirmed ones
//! - Prefix invalidation driving background refetches
//! - Metrics integration
//!
//! # Example
//!
//! ```
//! use optimistic_cache::{factories::PostKeys, OperationKind, QueryCache, Record};
//!
//! let store = QueryCache::new();
//! let post = Record::new().with("client_id", "tmp-1").with("profile_id", "u1");
//!
//! let snapshot = optimistic_cache::optimistic_update(&store, &PostKeys, &post, OperationKind::Add);
//! let confirmed = Record::new()
//!     .with("id", "p42")
//!     .with("client_id", "tmp-1")
//!     .with("profile_id", "u1");
//!
//! optimistic_cache::replace_optimistic_item_with(
//!     &store,
//!     &PostKeys,
//!     snapshot.entity(),
//!     &confirmed,
//!     &optimistic_cache::ByClientId,
//! );
//! optimistic_cache::invalidate_keys(&store, &PostKeys, &confirmed);
//! ```

mod config;
mod engine;
mod error;
mod factory;
mod invalidate;
mod keys;
mod metrics;
mod mutation;
mod optimistic;
mod patch;
mod reconcile;
mod record;
mod rollback;
mod store;

pub mod factories;

pub use config::{EngineConfig, InvalidationMode, ENV_PREFIX};
pub use engine::SyncEngine;
pub use error::{CacheError, CacheResult, MutationError};
pub use factory::{default_insert_policy, InsertPolicy, KeyFactory, KeyFactoryRegistry, RankOrder};
pub use keys::{CacheKey, KeyEntry, KeySet, KeySetBuilder, Shape};
pub use metrics::{EngineMetrics, ReconcileOutcome};
pub use mutation::{EntityMutations, OptimisticMutation};
pub use reconcile::ReconcileReport;
pub use record::{ByClientId, ById, IdentityComparator, OperationKind, Record, CLIENT_ID_FIELD, ID_FIELD};
pub use rollback::Snapshot;
pub use store::{refetch_error, BatchPatch, CacheEvent, CacheStore, CacheValue, ObserverGuard, QueryCache};

/// Optimistic update with the default engine, matching by `id`
pub fn optimistic_update<S, F>(store: &S, factory: &F, entity: &Record, kind: OperationKind) -> Snapshot
where
    S: CacheStore + ?Sized,
    F: KeyFactory + ?Sized,
{
    SyncEngine::default().optimistic_update(store, factory, entity, kind)
}

/// Restore a snapshot with the default engine
pub fn rollback_cache<S>(store: &S, snapshot: Option<&Snapshot>) -> usize
where
    S: CacheStore + ?Sized,
{
    SyncEngine::default().rollback_cache(store, snapshot)
}

/// Reconcile with the default engine, matching by `id`
pub fn replace_optimistic_item<S, F>(
    store: &S,
    factory: &F,
    entity: &Record,
    new_entity: &Record,
) -> ReconcileReport
where
    S: CacheStore + ?Sized,
    F: KeyFactory + ?Sized,
{
    SyncEngine::default().replace_optimistic_item(store, factory, entity, new_entity)
}

/// Reconcile with the default engine and a custom identity comparator
pub fn replace_optimistic_item_with<S, F, I>(
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
    SyncEngine::default().replace_optimistic_item_with(store, factory, entity, new_entity, identity)
}

/// Invalidate with the default engine
pub fn invalidate_keys<S, F>(store: &S, factory: &F, entity: &Record) -> usize
where
    S: CacheStore + ?Sized,
    F: KeyFactory + ?Sized,
{
    SyncEngine::default().invalidate_keys(store, factory, entity)
}
