//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `reconcile_controller_reconciliations_total` - Total number of reconcile attempts
//! - `reconcile_controller_reconciliation_errors_total` - Reconcile attempts that failed and were retried
//! - `reconcile_controller_reconciliations_abandoned_total` - Keys dropped after a permanent error
//! - `reconcile_controller_reconciliation_duration_seconds` - Duration of reconcile attempts
//! - `reconcile_controller_requeues_total` - Re-enqueues by reason (`error-backoff`, `requeue-after`)
//! - `reconcile_controller_key_extraction_errors_total` - Notifications dropped for lack of a key
//! - `workqueue_adds_total` - Keys accepted into the queued set, by queue name
//! - `workqueue_depth` - Current number of queued keys, by queue name
//! - `workqueue_retries_total` - Rate-limited re-adds, by queue name

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGaugeVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reconcile_controller_reconciliations_total",
        "Total number of reconcile attempts",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reconcile_controller_reconciliation_errors_total",
        "Total number of reconcile attempts that failed and were scheduled for retry",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATIONS_ABANDONED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reconcile_controller_reconciliations_abandoned_total",
        "Total number of keys abandoned after a permanent reconcile error",
    )
    .expect("Failed to create RECONCILIATIONS_ABANDONED_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "reconcile_controller_reconciliation_duration_seconds",
            "Duration of reconcile attempts in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "reconcile_controller_requeues_total",
            "Total number of keys re-enqueued after reconcile, by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static KEY_EXTRACTION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reconcile_controller_key_extraction_errors_total",
        "Total number of notifications dropped because no key could be derived",
    )
    .expect("Failed to create KEY_EXTRACTION_ERRORS_TOTAL metric - this should never happen")
});

static WORKQUEUE_ADDS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "workqueue_adds_total",
            "Total number of keys accepted into the queued set",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_ADDS_TOTAL metric - this should never happen")
});

static WORKQUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new("workqueue_depth", "Current number of queued keys"),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_DEPTH metric - this should never happen")
});

static WORKQUEUE_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "workqueue_retries_total",
            "Total number of rate-limited re-adds",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_RETRIES_TOTAL metric - this should never happen")
});

/// Register all metrics with the shared registry.
///
/// # Errors
///
/// Returns an error if a collector is already registered, which happens when
/// this is called more than once.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_ABANDONED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEY_EXTRACTION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKQUEUE_ADDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKQUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(WORKQUEUE_RETRIES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn increment_reconciliations_abandoned() {
    RECONCILIATIONS_ABANDONED_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// Increment requeue counter, labelled by why the key went back on the queue
pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_key_extraction_errors() {
    KEY_EXTRACTION_ERRORS_TOTAL.inc();
}

pub fn increment_workqueue_adds(queue: &str) {
    WORKQUEUE_ADDS_TOTAL.with_label_values(&[queue]).inc();
}

pub fn set_workqueue_depth(queue: &str, depth: usize) {
    let depth = i64::try_from(depth).unwrap_or(i64::MAX);
    WORKQUEUE_DEPTH.with_label_values(&[queue]).set(depth);
}

pub fn increment_workqueue_retries(queue: &str) {
    WORKQUEUE_RETRIES_TOTAL.with_label_values(&[queue]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_rejects_duplicates() {
        // Another test may already have registered the collectors
        let _ = register_metrics();
        assert!(register_metrics().is_err());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        let after = RECONCILIATIONS_TOTAL.get();
        assert!(after > before);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL.get();
        increment_reconciliation_errors();
        let after = RECONCILIATION_ERRORS_TOTAL.get();
        assert!(after > before);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration(0.25);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_requeues_are_labelled_by_reason() {
        let before = REQUEUES_TOTAL.with_label_values(&["unit-test"]).get();
        increment_requeues_total("unit-test");
        let after = REQUEUES_TOTAL.with_label_values(&["unit-test"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_workqueue_depth_tracks_latest_value() {
        set_workqueue_depth("metrics-unit-test", 7);
        assert_eq!(
            WORKQUEUE_DEPTH
                .with_label_values(&["metrics-unit-test"])
                .get(),
            7
        );
        set_workqueue_depth("metrics-unit-test", 0);
        assert_eq!(
            WORKQUEUE_DEPTH
                .with_label_values(&["metrics-unit-test"])
                .get(),
            0
        );
    }
}
