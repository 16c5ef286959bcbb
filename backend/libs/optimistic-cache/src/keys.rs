//! Cache key schema
//!
//! A cache key is an ordered tuple of segments whose first segment is the
//! entity root (`posts`, `post`, `ads`, ...). Displayed colon-joined:
//! `posts:user:{profile_id}`.

use crate::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::warn;

/// Identifier of one cached view
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a colon-joined key
    ///
    /// ```
    /// use optimistic_cache::CacheKey;
    ///
    /// let key = CacheKey::parse("posts:user:u1").unwrap();
    /// assert_eq!(key, CacheKey::new(["posts", "user", "u1"]));
    /// assert!(CacheKey::parse("").is_err());
    /// ```
    pub fn parse(key: &str) -> CacheResult<Self> {
        let segments: Vec<&str> = key.split(':').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CacheError::InvalidKey(format!(
                "Invalid cache key format: {}. Expected format: <root>[:<segment>...]",
                key
            )));
        }
        Ok(Self::new(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Entity root segment
    pub fn root(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}

/// Declared shape of the value a key holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    List,
    Single,
    Pages,
}

/// One key of a key set with its declared shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyEntry {
    pub key: CacheKey,
    pub shape: Shape,
}

/// Named scopes (`all`, `single`, `user`, ...) to the keys they cover
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeySet {
    scopes: BTreeMap<String, Vec<KeyEntry>>,
}

impl KeySet {
    pub fn scope(&self, name: &str) -> &[KeyEntry] {
        self.scopes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    /// Every entry once, in scope order
    pub fn entries(&self) -> Vec<&KeyEntry> {
        let mut seen = HashSet::new();
        self.scopes
            .values()
            .flatten()
            .filter(|entry| seen.insert(entry.key.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<&CacheKey> {
        self.entries().into_iter().map(|e| &e.key).collect()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.scopes.values().flatten().any(|e| &e.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.values().all(Vec::is_empty)
    }

    /// True when every key of `other` is also in `self`
    pub fn is_superset_of(&self, other: &KeySet) -> bool {
        other.keys().into_iter().all(|k| self.contains(k))
    }

    /// Union by scope; duplicate keys are kept once
    pub fn union(&self, other: &KeySet) -> KeySet {
        let mut scopes = self.scopes.clone();
        for (name, entries) in &other.scopes {
            let target = scopes.entry(name.clone()).or_default();
            for entry in entries {
                if !target.iter().any(|e| e.key == entry.key) {
                    target.push(entry.clone());
                }
            }
        }
        KeySet { scopes }
    }
}

/// Builds a key set confined to a factory's roots
pub struct KeySetBuilder<'a> {
    roots: &'a [&'static str],
    set: KeySet,
}

impl<'a> KeySetBuilder<'a> {
    pub fn new(roots: &'a [&'static str]) -> Self {
        Self {
            roots,
            set: KeySet::default(),
        }
    }

    /// Add a key to a scope. Keys outside the factory's roots are dropped.
    pub fn push<I, S>(mut self, scope: &str, shape: Shape, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = CacheKey::new(segments);
        let in_scope = key
            .root()
            .map_or(false, |root| self.roots.iter().any(|r| *r == root));

        if in_scope {
            let entries = self.set.scopes.entry(scope.to_string()).or_default();
            if !entries.iter().any(|e| e.key == key) {
                entries.push(KeyEntry { key, shape });
            }
        } else {
            warn!(key = %key, scope = %scope, "Dropping key outside factory roots");
        }
        self
    }

    /// Add a key only when the descriptor field is present
    pub fn push_if<S>(
        self,
        scope: &str,
        shape: Shape,
        field: Option<S>,
        build: impl FnOnce(S) -> Vec<String>,
    ) -> Self {
        match field {
            Some(value) => {
                let segments = build(value);
                self.push(scope, shape, segments)
            }
            None => self,
        }
    }

    pub fn build(self) -> KeySet {
        self.set
    }
}
