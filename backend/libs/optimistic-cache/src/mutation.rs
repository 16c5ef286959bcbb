//! Mutation hooks
//!
//! Wraps a backend call with the optimistic lifecycle:
//! - on mutate: optimistic update and snapshot
//! - on error: rollback
//! - on success: reconcile with the confirmed record
//! - on settle: invalidate every key either record reaches
//! - on cancel: rollback and invalidate, as on error

use crate::factories::{
    AdKeys, GroupKeys, HashtagKeys, MediaLinkKeys, NotificationKeys, PostKeys,
};
use crate::{
    ById, ByClientId, CacheError, CacheStore, IdentityComparator, KeyFactory, KeyFactoryRegistry,
    MutationError, OperationKind, Record, Snapshot, SyncEngine,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Optimistic mutations for one entity type
pub struct OptimisticMutation<F> {
    store: Arc<dyn CacheStore>,
    factory: F,
    engine: SyncEngine,
}

/// Mutations resolved from a [`KeyFactoryRegistry`] at runtime
pub type EntityMutations = OptimisticMutation<Arc<dyn KeyFactory>>;

impl OptimisticMutation<PostKeys> {
    pub fn posts(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, PostKeys)
    }
}

impl OptimisticMutation<AdKeys> {
    pub fn ads(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, AdKeys)
    }
}

impl OptimisticMutation<MediaLinkKeys> {
    pub fn media_links(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, MediaLinkKeys)
    }
}

impl OptimisticMutation<NotificationKeys> {
    pub fn notifications(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, NotificationKeys)
    }
}

impl OptimisticMutation<GroupKeys> {
    pub fn groups(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, GroupKeys)
    }
}

impl OptimisticMutation<HashtagKeys> {
    pub fn hashtags(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, HashtagKeys)
    }
}

impl EntityMutations {
    pub fn from_registry(
        store: Arc<dyn CacheStore>,
        registry: &KeyFactoryRegistry,
        entity: &str,
    ) -> Result<Self, CacheError> {
        let factory = registry
            .get(entity)
            .ok_or_else(|| CacheError::UnknownEntity(entity.to_string()))?;
        Ok(Self::new(store, factory))
    }
}

impl<F: KeyFactory> OptimisticMutation<F> {
    pub fn new(store: Arc<dyn CacheStore>, factory: F) -> Self {
        Self {
            store,
            factory,
            engine: SyncEngine::default(),
        }
    }

    pub fn with_engine(mut self, engine: SyncEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Create, correlating the confirmed record by client id
    pub async fn create<C, Fut, E>(&self, entity: Record, call: C) -> Result<Record, MutationError<E>>
    where
        C: FnOnce(Record) -> Fut,
        Fut: Future<Output = Result<Record, E>>,
        E: Display,
    {
        self.run(OperationKind::Add, entity, &ByClientId, call).await
    }

    pub async fn update<C, Fut, E>(&self, entity: Record, call: C) -> Result<Record, MutationError<E>>
    where
        C: FnOnce(Record) -> Fut,
        Fut: Future<Output = Result<Record, E>>,
        E: Display,
    {
        self.run(OperationKind::Update, entity, &ById, call).await
    }

    /// Delete; the backend returns the deleted record
    pub async fn delete<C, Fut, E>(&self, entity: Record, call: C) -> Result<Record, MutationError<E>>
    where
        C: FnOnce(Record) -> Fut,
        Fut: Future<Output = Result<Record, E>>,
        E: Display,
    {
        self.run(OperationKind::Remove, entity, &ById, call).await
    }

    /// Typed variant of [`run`](Self::run): converts through [`Record`]
    pub async fn run_entity<T, C, Fut, E>(
        &self,
        kind: OperationKind,
        entity: &T,
        call: C,
    ) -> Result<T, MutationError<E>>
    where
        T: Serialize + DeserializeOwned,
        C: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let record = Record::from_entity(entity)?;

        let call = |record: Record| async move {
            let entity: T = record.into_entity()?;
            let confirmed = call(entity).await.map_err(MutationError::Backend)?;
            Ok::<_, MutationError<E>>(Record::from_entity(&confirmed)?)
        };

        let result = match kind {
            OperationKind::Add => self.run(kind, record, &ByClientId, call).await,
            _ => self.run(kind, record, &ById, call).await,
        };

        match result {
            Ok(confirmed) => Ok(confirmed.into_entity()?),
            Err(MutationError::Backend(inner)) => Err(inner),
            Err(MutationError::Cache(e)) => Err(MutationError::Cache(e)),
        }
    }

    /// Full optimistic lifecycle around `call`
    ///
    /// The backend receives the record as cached, including any placeholder
    /// id assigned to an anonymous add.
    pub async fn run<I, C, Fut, E>(
        &self,
        kind: OperationKind,
        entity: Record,
        identity: &I,
        call: C,
    ) -> Result<Record, MutationError<E>>
    where
        I: IdentityComparator + ?Sized,
        C: FnOnce(Record) -> Fut,
        Fut: Future<Output = Result<Record, E>>,
        E: Display,
    {
        let store = self.store.as_ref();
        let entity_name = self.factory.entity();

        let snapshot =
            self.engine
                .optimistic_update_with(store, &self.factory, &entity, kind, identity);
        let optimistic = snapshot.entity().clone();
        let pending = PendingMutation {
            engine: &self.engine,
            store,
            factory: &self.factory,
            snapshot: Some(snapshot),
        };

        let result = call(optimistic.clone()).await;
        let snapshot = pending.disarm();

        match result {
            Ok(confirmed) => {
                if kind != OperationKind::Remove {
                    self.engine.replace_optimistic_item_with(
                        store,
                        &self.factory,
                        &optimistic,
                        &confirmed,
                        identity,
                    );
                }
                let settled = self
                    .factory
                    .keys(&optimistic)
                    .union(&self.factory.keys(&confirmed));
                self.engine.invalidate_key_set(store, &settled);

                info!(entity = %entity_name, kind = %kind, "Optimistic mutation confirmed");
                Ok(confirmed)
            }
            Err(e) => {
                warn!(
                    entity = %entity_name,
                    kind = %kind,
                    error = %e,
                    "Mutation failed, rolling back optimistic update"
                );
                self.engine.rollback_cache(store, snapshot.as_ref());
                self.engine
                    .invalidate_keys(store, &self.factory, &optimistic);
                Err(MutationError::Backend(e))
            }
        }
    }
}

/// Rolls back and invalidates if the mutation future is dropped before the
/// backend answers
struct PendingMutation<'a, F: KeyFactory> {
    engine: &'a SyncEngine,
    store: &'a dyn CacheStore,
    factory: &'a F,
    snapshot: Option<Snapshot>,
}

impl<F: KeyFactory> PendingMutation<'_, F> {
    fn disarm(mut self) -> Option<Snapshot> {
        self.snapshot.take()
    }
}

impl<F: KeyFactory> Drop for PendingMutation<'_, F> {
    fn drop(&mut self) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };

        warn!(
            entity = %self.factory.entity(),
            kind = %snapshot.kind(),
            "Mutation cancelled in flight, rolling back optimistic update"
        );
        self.engine.rollback_cache(self.store, Some(&snapshot));
        self.engine
            .invalidate_keys(self.store, self.factory, snapshot.entity());
    }
}
