//! Engine metrics for observability

use crate::{CacheKey, OperationKind};
use prometheus::{CounterVec, Opts, Registry};
use std::sync::OnceLock;

static METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    patches: CounterVec,
    rollbacks: CounterVec,
    reconciliations: CounterVec,
    invalidations: CounterVec,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            patches: CounterVec::new(
                Opts::new(
                    "optimistic_cache_patches_total",
                    "Total optimistic patches written",
                ),
                &["entity", "kind"],
            )
            .expect("valid metric definition"),
            rollbacks: CounterVec::new(
                Opts::new(
                    "optimistic_cache_rollbacks_total",
                    "Total keys restored by rollback",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
            reconciliations: CounterVec::new(
                Opts::new(
                    "optimistic_cache_reconciliations_total",
                    "Total reconciliation outcomes per key",
                ),
                &["entity", "outcome"],
            )
            .expect("valid metric definition"),
            invalidations: CounterVec::new(
                Opts::new(
                    "optimistic_cache_invalidations_total",
                    "Total keys marked stale",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.patches.clone()))?;
        registry.register(Box::new(self.rollbacks.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.invalidations.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static EngineMetricsInner {
    METRICS.get_or_init(EngineMetricsInner::new)
}

/// Entity label from the key root
fn extract_entity(key: &CacheKey) -> &str {
    key.root().unwrap_or("unknown")
}

/// Reconciliation outcome label
#[derive(Debug, Clone, Copy)]
pub enum ReconcileOutcome {
    Replaced,
    Inserted,
    Missed,
}

impl ReconcileOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Replaced => "replaced",
            ReconcileOutcome::Inserted => "inserted",
            ReconcileOutcome::Missed => "missed",
        }
    }
}

/// Engine metrics wrapper
#[derive(Clone, Default)]
pub struct EngineMetrics;

impl EngineMetrics {
    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_patch(key: &CacheKey, kind: OperationKind) {
        let entity = extract_entity(key);
        let kind = kind.to_string();
        get_metrics()
            .patches
            .with_label_values(&[entity, kind.as_str()])
            .inc();
    }

    pub fn record_rollback(key: &CacheKey) {
        let entity = extract_entity(key);
        get_metrics().rollbacks.with_label_values(&[entity]).inc();
    }

    pub fn record_reconcile(key: &CacheKey, outcome: ReconcileOutcome) {
        let entity = extract_entity(key);
        get_metrics()
            .reconciliations
            .with_label_values(&[entity, outcome.as_str()])
            .inc();
    }

    pub fn record_invalidation(key: &CacheKey) {
        let entity = extract_entity(key);
        get_metrics()
            .invalidations
            .with_label_values(&[entity])
            .inc();
    }
}
