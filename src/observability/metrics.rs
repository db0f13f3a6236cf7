//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! All per-kind metrics carry a `kind` label (AWSRole, AzureRole, GCPRole, DatabaseRole, VaultServer).
//!
//! - `vault_engine_reconciliations_total` - Total number of reconciliations
//! - `vault_engine_reconciliation_errors_total` - Total number of failed reconciliations
//! - `vault_engine_reconciliation_duration_seconds` - Duration of reconciliations
//! - `vault_engine_requeues_total` - Keys re-added to a queue with backoff
//! - `vault_engine_dropped_total` - Keys dropped after exhausting their retry budget
//! - `vault_engine_finalizations_total` - Finished finalizations by outcome (done, timed_out)
//! - `vault_engine_queue_depth` - Keys waiting in a queue
//! - `vault_engine_active_monitors` - Background monitors currently running

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_engine_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_engine_reconciliation_errors_total",
            "Total number of failed reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "vault_engine_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_engine_requeues_total",
            "Total number of keys re-added to a queue with backoff",
        ),
        &["kind"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static DROPPED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_engine_dropped_total",
            "Total number of keys dropped after exhausting their retry budget",
        ),
        &["kind"],
    )
    .expect("Failed to create DROPPED_TOTAL metric - this should never happen")
});

static FINALIZATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vault_engine_finalizations_total",
            "Total number of finished finalizations by outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create FINALIZATIONS_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new("vault_engine_queue_depth", "Number of keys waiting in a queue"),
        &["kind"],
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

static ACTIVE_MONITORS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "vault_engine_active_monitors",
        "Number of background monitors currently running",
    )
    .expect("Failed to create ACTIVE_MONITORS metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FINALIZATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_MONITORS.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_requeues(kind: &str) {
    REQUEUES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_dropped(kind: &str) {
    DROPPED_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a finished finalization; `outcome` is `done` or `timed_out`
pub fn increment_finalizations(kind: &str, outcome: &str) {
    FINALIZATIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn set_queue_depth(kind: &str, depth: usize) {
    QUEUE_DEPTH
        .with_label_values(&[kind])
        .set(i64::try_from(depth).unwrap_or(i64::MAX));
}

pub fn set_active_monitors(count: usize) {
    ACTIVE_MONITORS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Render all registered metrics in the Prometheus text format
pub fn gather() -> Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
