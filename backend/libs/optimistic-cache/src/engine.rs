//! Engine handle shared by the optimistic, rollback, reconcile and
//! invalidate operations

use crate::{EngineConfig, OperationKind, Record, CLIENT_ID_FIELD, ID_FIELD};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

static PLACEHOLDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Cache synchronization engine
///
/// Stateless apart from configuration; the store and key factory are passed
/// to every operation.
#[derive(Debug, Clone, Default)]
pub struct SyncEngine {
    pub(crate) config: EngineConfig,
}

impl SyncEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process-unique placeholder id: `{prefix}-{unix_millis}-{seq}`
    pub fn placeholder_id(&self) -> String {
        let seq = PLACEHOLDER_SEQ.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}-{}",
            self.config.placeholder_prefix,
            Utc::now().timestamp_millis(),
            seq
        )
    }

    /// Give an added record an identity before it enters the cache
    ///
    /// A record with only a client id uses it as its id; a record with
    /// neither gets a placeholder used for both.
    pub(crate) fn with_identity(&self, entity: &Record, kind: OperationKind) -> Record {
        if kind != OperationKind::Add || entity.id().is_some() {
            return entity.clone();
        }

        let mut entity = entity.clone();
        match entity.client_id() {
            Some(client_id) => entity.set(ID_FIELD, client_id),
            None => {
                let placeholder = self.placeholder_id();
                entity.set(ID_FIELD, placeholder.clone());
                entity.set(CLIENT_ID_FIELD, placeholder);
            }
        }
        entity
    }
}
