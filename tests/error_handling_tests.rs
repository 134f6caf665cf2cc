//! # Error Handling Tests
//!
//! Watch error classification, reconcile error variants and the backoff
//! sequences produced by each configured strategy.

use std::time::Duration;

use reconcile_controller::config::{BackoffStrategy, ConfigError, ControllerConfig};
use reconcile_controller::runtime::error_policy::{classify_watch_error, WatchErrorKind};
use reconcile_controller::runtime::{ControllerError, ReconcilerError};

const MS: Duration = Duration::from_millis(1);

#[test]
fn test_watch_error_classification() {
    let test_cases = [
        ("ApiError: Unauthorized (401)", WatchErrorKind::Unauthorized),
        (
            "too old resource version: 123 (456)",
            WatchErrorKind::Expired,
        ),
        ("ApiError: Gone (410)", WatchErrorKind::Expired),
        (
            "storage is (re)initializing",
            WatchErrorKind::Throttled,
        ),
        ("ApiError: TooManyRequests (429)", WatchErrorKind::Throttled),
        ("ApiError: ObjectNotFound (404)", WatchErrorKind::NotFound),
        ("connection reset by peer", WatchErrorKind::Other),
    ];

    for (message, expected) in test_cases {
        assert_eq!(
            classify_watch_error(message),
            expected,
            "'{message}' should classify as {}",
            expected.as_str()
        );
    }
}

#[test]
fn test_not_found_wins_over_unauthorized() {
    let message = "failed to perform initial object list: Error deserializing response: 404 page not found (401 on retry)";
    assert_eq!(classify_watch_error(message), WatchErrorKind::NotFound);
}

#[test]
fn test_reconciler_error_variants() {
    let transient: ReconcilerError = anyhow::anyhow!("backend unavailable").into();
    assert!(matches!(transient, ReconcilerError::ReconciliationFailed(_)));
    assert_eq!(
        transient.to_string(),
        "Reconciliation failed: backend unavailable"
    );

    let permanent = ReconcilerError::permanent(anyhow::anyhow!("spec is invalid"));
    assert!(matches!(permanent, ReconcilerError::Permanent(_)));
    assert_eq!(
        permanent.to_string(),
        "Reconciliation failed permanently: spec is invalid"
    );
}

#[test]
fn test_controller_error_wraps_config_error() {
    let error: ControllerError = ConfigError::ZeroWorkers.into();
    assert_eq!(
        error.to_string(),
        "Invalid controller configuration: worker count must be at least 1"
    );
}

#[test]
fn test_exponential_backoff_sequence_from_config() {
    let config = ControllerConfig {
        base_retry_delay_ms: 5,
        max_retry_delay_ms: 100,
        backoff_strategy: BackoffStrategy::Exponential,
        ..ControllerConfig::default()
    };
    let limiter = config.rate_limiter::<String>();
    let key = "default/example".to_string();

    let delays: Vec<_> = (0..7).map(|_| limiter.when(&key)).collect();
    assert_eq!(
        delays,
        [5 * MS, 10 * MS, 20 * MS, 40 * MS, 80 * MS, 100 * MS, 100 * MS]
    );
    assert_eq!(limiter.num_requeues(&key), 7);

    limiter.forget(&key);
    assert_eq!(limiter.num_requeues(&key), 0);
    assert_eq!(limiter.when(&key), 5 * MS);
}

#[test]
fn test_fibonacci_backoff_sequence_from_config() {
    let config = ControllerConfig {
        base_retry_delay_ms: 10,
        max_retry_delay_ms: 60,
        backoff_strategy: BackoffStrategy::Fibonacci,
        ..ControllerConfig::default()
    };
    let limiter = config.rate_limiter::<String>();
    let key = "default/example".to_string();

    let delays: Vec<_> = (0..7).map(|_| limiter.when(&key)).collect();
    assert_eq!(
        delays,
        [10 * MS, 10 * MS, 20 * MS, 30 * MS, 50 * MS, 60 * MS, 60 * MS]
    );
}

#[test]
fn test_backoff_strategy_parsing() {
    assert_eq!("fib".parse::<BackoffStrategy>(), Ok(BackoffStrategy::Fibonacci));
    assert_eq!(" Exponential ".parse::<BackoffStrategy>(), Ok(BackoffStrategy::Exponential));
    assert_eq!(
        "linear".parse::<BackoffStrategy>(),
        Err(ConfigError::UnknownBackoffStrategy("linear".to_string()))
    );
}
