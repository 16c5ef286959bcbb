//! Key factory contract and registry
//!
//! A key factory maps a (possibly partial) entity descriptor to every cache
//! key the entity participates in. Factories must be pure and total: a
//! missing descriptor field omits the keys that need it, nothing fails.

use crate::{CacheError, CacheKey, CacheResult, KeySet, Record};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Ordering of ranked list inserts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankOrder {
    Ascending,
    Descending,
}

/// Where an added record lands in a list-shaped value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Most recent first
    Prepend,
    Append,
    /// Keep the list sorted by a numeric field
    Ranked { field: String, order: RankOrder },
}

/// Default policy: ranked when the record carries `rank_field`, else prepend
pub fn default_insert_policy(entity: &Record, rank_field: &str) -> InsertPolicy {
    if entity.number_field(rank_field).is_some() {
        InsertPolicy::Ranked {
            field: rank_field.to_string(),
            order: RankOrder::Ascending,
        }
    } else {
        InsertPolicy::Prepend
    }
}

/// Per-entity-type cache key schema
pub trait KeyFactory: Send + Sync {
    /// Entity type name, e.g. `post`
    fn entity(&self) -> &'static str;

    /// Root segments this factory owns. No other factory may share one.
    fn roots(&self) -> &'static [&'static str];

    /// Every key the descriptor reaches
    fn keys(&self, descriptor: &Record) -> KeySet;

    /// Insert position for `entity` in the list under `key`
    fn insert_policy(&self, _key: &CacheKey, entity: &Record, rank_field: &str) -> InsertPolicy {
        default_insert_policy(entity, rank_field)
    }

    /// Whether reconciliation may insert `confirmed` into a list that never
    /// held the optimistic record
    fn append_on_reconcile(&self, _key: &CacheKey, _confirmed: &Record) -> bool {
        false
    }
}

impl<T: KeyFactory + ?Sized> KeyFactory for Arc<T> {
    fn entity(&self) -> &'static str {
        (**self).entity()
    }

    fn roots(&self) -> &'static [&'static str] {
        (**self).roots()
    }

    fn keys(&self, descriptor: &Record) -> KeySet {
        (**self).keys(descriptor)
    }

    fn insert_policy(&self, key: &CacheKey, entity: &Record, rank_field: &str) -> InsertPolicy {
        (**self).insert_policy(key, entity, rank_field)
    }

    fn append_on_reconcile(&self, key: &CacheKey, confirmed: &Record) -> bool {
        (**self).append_on_reconcile(key, confirmed)
    }
}

/// One factory per entity type, with disjoint roots
#[derive(Default, Clone)]
pub struct KeyFactoryRegistry {
    factories: HashMap<&'static str, Arc<dyn KeyFactory>>,
    root_owners: HashMap<&'static str, &'static str>,
}

impl KeyFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every shipped entity factory
    pub fn with_defaults() -> CacheResult<Self> {
        let mut registry = Self::new();
        for factory in crate::factories::all() {
            registry.register(factory)?;
        }
        Ok(registry)
    }

    /// Register a factory. Fails when a root or entity name is taken.
    pub fn register(&mut self, factory: Arc<dyn KeyFactory>) -> CacheResult<()> {
        let entity = factory.entity();

        if self.factories.contains_key(entity) {
            return Err(CacheError::RootConflict {
                root: entity.to_string(),
                owner: entity.to_string(),
            });
        }

        for root in factory.roots() {
            if let Some(owner) = self.root_owners.get(root) {
                return Err(CacheError::RootConflict {
                    root: root.to_string(),
                    owner: owner.to_string(),
                });
            }
        }

        for root in factory.roots() {
            self.root_owners.insert(*root, entity);
        }
        self.factories.insert(entity, factory);

        info!(entity = %entity, "Key factory registered");
        Ok(())
    }

    pub fn get(&self, entity: &str) -> Option<Arc<dyn KeyFactory>> {
        self.factories.get(entity).cloned()
    }

    /// Factory owning the root segment of `key`
    pub fn owner_of(&self, key: &CacheKey) -> Option<Arc<dyn KeyFactory>> {
        let entity = self.root_owners.get(key.root()?)?;
        self.get(entity)
    }

    pub fn entities(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeySetBuilder, Shape};

    struct Widgets;

    impl KeyFactory for Widgets {
        fn entity(&self) -> &'static str {
            "widget"
        }

        fn roots(&self) -> &'static [&'static str] {
            &["widgets"]
        }

        fn keys(&self, descriptor: &Record) -> KeySet {
            KeySetBuilder::new(self.roots())
                .push("all", Shape::List, ["widgets"])
                .push_if("single", Shape::Single, descriptor.id(), |id| {
                    vec!["widgets".into(), "id".into(), id]
                })
                .build()
        }
    }

    struct Gadgets;

    impl KeyFactory for Gadgets {
        fn entity(&self) -> &'static str {
            "gadget"
        }

        fn roots(&self) -> &'static [&'static str] {
            &["gadgets", "widgets"]
        }

        fn keys(&self, _descriptor: &Record) -> KeySet {
            KeySet::default()
        }
    }

    #[test]
    fn test_default_insert_policy() {
        let plain = Record::new().with("id", "a");
        assert_eq!(default_insert_policy(&plain, "rank"), InsertPolicy::Prepend);

        let ranked = Record::new().with("id", "a").with("rank", 3);
        assert_eq!(
            default_insert_policy(&ranked, "rank"),
            InsertPolicy::Ranked {
                field: "rank".into(),
                order: RankOrder::Ascending
            }
        );
    }

    #[test]
    fn test_register_rejects_shared_root() {
        let mut registry = KeyFactoryRegistry::new();
        registry.register(Arc::new(Widgets)).unwrap();

        let err = registry.register(Arc::new(Gadgets)).unwrap_err();
        assert!(matches!(
            err,
            CacheError::RootConflict { ref root, ref owner } if root == "widgets" && owner == "widget"
        ));
        assert_eq!(registry.entities(), vec!["widget"]);
    }

    #[test]
    fn test_register_rejects_duplicate_entity() {
        let mut registry = KeyFactoryRegistry::new();
        registry.register(Arc::new(Widgets)).unwrap();
        assert!(registry.register(Arc::new(Widgets)).is_err());
    }

    #[test]
    fn test_owner_lookup() {
        let mut registry = KeyFactoryRegistry::new();
        registry.register(Arc::new(Widgets)).unwrap();

        let owner = registry
            .owner_of(&CacheKey::new(["widgets", "id", "w1"]))
            .unwrap();
        assert_eq!(owner.entity(), "widget");
        assert!(registry.owner_of(&CacheKey::new(["ads"])).is_none());
    }

    #[test]
    fn test_defaults_register_without_conflict() {
        let registry = KeyFactoryRegistry::with_defaults().unwrap();
        assert_eq!(
            registry.entities(),
            vec!["ad", "group", "hashtag", "media_link", "notification", "post"]
        );
    }
}
