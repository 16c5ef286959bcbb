//! Cached record representation and identity comparison
//!
//! Every entity type (post, ad, media link, notification, group, hashtag)
//! shares one store, so records are held as JSON objects. Typed entities
//! convert in and out with serde.

use crate::{CacheError, CacheResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Server-assigned identity field
pub const ID_FIELD: &str = "id";

/// Client-generated correlation id field
pub const CLIENT_ID_FIELD: &str = "client_id";

/// Legacy spellings of the correlation id accepted on read
const CLIENT_ID_ALIASES: [&str; 2] = ["tempId", "temp_id"];

/// Kind of optimistic mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Update,
    Remove,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Add => write!(f, "add"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Remove => write!(f, "remove"),
        }
    }
}

/// A cached entity or filter descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Convert a typed entity. Fails if it does not serialize to an object.
    pub fn from_entity<T: Serialize>(entity: &T) -> CacheResult<Self> {
        match serde_json::to_value(entity)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CacheError::InvalidRecord(format!(
                "expected object, got {}",
                other
            ))),
        }
    }

    pub fn into_entity<T: DeserializeOwned>(self) -> CacheResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0))?)
    }

    /// Builder-style field setter
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    /// Attach a fresh client correlation id (uuid v4)
    pub fn with_client_id(self) -> Self {
        let client_id = uuid::Uuid::new_v4().to_string();
        self.with(CLIENT_ID_FIELD, client_id)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// String view of a field. Numbers are rendered so numeric ids still key.
    pub fn str_field(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// String items of an array field, skipping anything else
    pub fn str_list(&self, field: &str) -> Vec<String> {
        match self.0.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn number_field(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn id(&self) -> Option<String> {
        self.str_field(ID_FIELD)
    }

    pub fn client_id(&self) -> Option<String> {
        self.str_field(CLIENT_ID_FIELD).or_else(|| {
            CLIENT_ID_ALIASES
                .iter()
                .find_map(|alias| self.str_field(alias))
        })
    }

    /// Correlation identity: client id when present, else server id
    pub fn correlation_id(&self) -> Option<String> {
        self.client_id().or_else(|| self.id())
    }

    /// Shallow merge: fields of `patch` overwrite fields of `self`
    pub fn merged_with(&self, patch: &Record) -> Record {
        let mut merged = self.0.clone();
        for (field, value) in &patch.0 {
            merged.insert(field.clone(), value.clone());
        }
        Record(merged)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Decides whether two representations are the same logical record
pub trait IdentityComparator: Send + Sync {
    fn same(&self, a: &Record, b: &Record) -> bool;
}

impl<F> IdentityComparator for F
where
    F: Fn(&Record, &Record) -> bool + Send + Sync,
{
    fn same(&self, a: &Record, b: &Record) -> bool {
        self(a, b)
    }
}

/// Equal server `id` (default comparator)
#[derive(Debug, Clone, Copy, Default)]
pub struct ById;

impl IdentityComparator for ById {
    fn same(&self, a: &Record, b: &Record) -> bool {
        matches!((a.id(), b.id()), (Some(x), Some(y)) if x == y)
    }
}

/// Equal client correlation id, falling back to `id` on either side
#[derive(Debug, Clone, Copy, Default)]
pub struct ByClientId;

impl IdentityComparator for ByClientId {
    fn same(&self, a: &Record, b: &Record) -> bool {
        matches!(
            (a.correlation_id(), b.correlation_id()),
            (Some(x), Some(y)) if x == y
        )
    }
}
