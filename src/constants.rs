//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default number of concurrent reconcile workers
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Default first retry delay for a failing key (milliseconds)
pub const DEFAULT_BASE_RETRY_DELAY_MS: u64 = 5;

/// Default cap on the retry delay for a failing key (milliseconds)
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 1_000_000;

/// Default period between full re-enqueues of the cache (seconds, 0 disables)
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 0;

/// Default interval between cache readiness checks during startup (milliseconds)
pub const DEFAULT_CACHE_SYNC_POLL_INTERVAL_MS: u64 = 100;

/// Default limit on waiting for the initial cache sync (seconds, 0 waits until cancelled)
pub const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 0;

/// Default bound on waiting for the controller to stop before the process exits (seconds)
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS: u64 = 30;

/// Default work queue name, used as the metrics label
pub const DEFAULT_QUEUE_NAME: &str = "controller";

/// Default log level when `RUST_LOG` is unset
pub const DEFAULT_LOG_LEVEL: &str = "info";
