//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::queue::{ExponentialFailureRateLimiter, FibonacciFailureRateLimiter, RateLimiter};

/// Invalid controller configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("base retry delay must be greater than zero")]
    ZeroBaseRetryDelay,
    #[error("base retry delay ({base_ms}ms) exceeds max retry delay ({max_ms}ms)")]
    BaseExceedsMax { base_ms: u64, max_ms: u64 },
    #[error("cache sync poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("unknown backoff strategy '{0}', expected 'exponential' or 'fibonacci'")]
    UnknownBackoffStrategy(String),
}

/// How retry delays grow for a failing key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// base × 2^failures
    #[default]
    Exponential,
    /// base × fib(failures)
    Fibonacci,
}

impl BackoffStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Fibonacci => "fibonacci",
        }
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackoffStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exponential" | "exp" => Ok(Self::Exponential),
            "fibonacci" | "fib" => Ok(Self::Fibonacci),
            other => Err(ConfigError::UnknownBackoffStrategy(other.to_string())),
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers ("threadiness")
    pub worker_count: usize,
    /// First retry delay for a failing key (milliseconds)
    pub base_retry_delay_ms: u64,
    /// Cap on the retry delay for a failing key (milliseconds)
    pub max_retry_delay_ms: u64,
    /// Growth of the retry delay across consecutive failures
    pub backoff_strategy: BackoffStrategy,
    /// Period between full re-enqueues of every cached object (seconds, 0 disables)
    pub resync_period_secs: u64,
    /// Interval between cache readiness checks during startup (milliseconds)
    pub cache_sync_poll_interval_ms: u64,
    /// Limit on waiting for the initial cache sync (seconds, 0 waits until cancelled)
    pub cache_sync_timeout_secs: u64,
    /// Bound on waiting for the controller to stop before the process exits (seconds)
    /// Last-resort safety net; the controller joins its workers on its own
    pub shutdown_grace_period_secs: u64,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Namespace to watch (None watches all namespaces)
    pub watch_namespace: Option<String>,
    /// Work queue name, used as the metrics label
    pub queue_name: String,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            base_retry_delay_ms: DEFAULT_BASE_RETRY_DELAY_MS,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
            backoff_strategy: BackoffStrategy::default(),
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            cache_sync_poll_interval_ms: DEFAULT_CACHE_SYNC_POLL_INTERVAL_MS,
            cache_sync_timeout_secs: DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
            shutdown_grace_period_secs: DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            watch_namespace: None,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// Unparseable values fall back to their defaults, except an unknown
    /// `BACKOFF_STRATEGY`, which is logged and then falls back.
    pub fn from_env() -> Self {
        use crate::constants::*;
        let backoff_strategy = std::env::var("BACKOFF_STRATEGY")
            .ok()
            .map_or(Ok(BackoffStrategy::default()), |v| v.parse())
            .unwrap_or_else(|e| {
                warn!(error = %e, "Invalid BACKOFF_STRATEGY, using default");
                BackoffStrategy::default()
            });

        Self {
            worker_count: env_var_or_default("WORKER_COUNT", DEFAULT_WORKER_COUNT),
            base_retry_delay_ms: env_var_or_default(
                "BASE_RETRY_DELAY_MS",
                DEFAULT_BASE_RETRY_DELAY_MS,
            ),
            max_retry_delay_ms: env_var_or_default("MAX_RETRY_DELAY_MS", DEFAULT_MAX_RETRY_DELAY_MS),
            backoff_strategy,
            resync_period_secs: env_var_or_default("RESYNC_PERIOD_SECS", DEFAULT_RESYNC_PERIOD_SECS),
            cache_sync_poll_interval_ms: env_var_or_default(
                "CACHE_SYNC_POLL_INTERVAL_MS",
                DEFAULT_CACHE_SYNC_POLL_INTERVAL_MS,
            ),
            cache_sync_timeout_secs: env_var_or_default(
                "CACHE_SYNC_TIMEOUT_SECS",
                DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
            ),
            shutdown_grace_period_secs: env_var_or_default(
                "SHUTDOWN_GRACE_PERIOD_SECS",
                DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.trim().is_empty()),
            queue_name: env_var_or_default_str("QUEUE_NAME", DEFAULT_QUEUE_NAME),
            log_level: env_var_or_default_str("LOG_LEVEL", DEFAULT_LOG_LEVEL),
        }
    }

    /// Check the settings the controller cannot run with
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.base_retry_delay_ms == 0 {
            return Err(ConfigError::ZeroBaseRetryDelay);
        }
        if self.base_retry_delay_ms > self.max_retry_delay_ms {
            return Err(ConfigError::BaseExceedsMax {
                base_ms: self.base_retry_delay_ms,
                max_ms: self.max_retry_delay_ms,
            });
        }
        if self.cache_sync_poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }

    /// Get base retry delay duration
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    /// Get max retry delay duration
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Get resync period, if resync is enabled
    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_period_secs > 0).then(|| Duration::from_secs(self.resync_period_secs))
    }

    /// Get cache sync poll interval duration
    pub fn cache_sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sync_poll_interval_ms)
    }

    /// Get cache sync timeout, if one is configured
    pub fn cache_sync_timeout(&self) -> Option<Duration> {
        (self.cache_sync_timeout_secs > 0).then(|| Duration::from_secs(self.cache_sync_timeout_secs))
    }

    /// Get shutdown grace period duration
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// Build the per-key rate limiter selected by `backoff_strategy`
    pub fn rate_limiter<T>(&self) -> Arc<dyn RateLimiter<T>>
    where
        T: Clone + Eq + std::hash::Hash + Send + 'static,
    {
        match self.backoff_strategy {
            BackoffStrategy::Exponential => Arc::new(ExponentialFailureRateLimiter::new(
                self.base_retry_delay(),
                self.max_retry_delay(),
            )),
            BackoffStrategy::Fibonacci => Arc::new(FibonacciFailureRateLimiter::new(
                self.base_retry_delay(),
                self.max_retry_delay(),
            )),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::default();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.base_retry_delay(), Duration::from_millis(5));
        assert_eq!(config.max_retry_delay(), Duration::from_secs(1000));
        assert_eq!(config.resync_period(), None);
        assert_eq!(config.cache_sync_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = ControllerConfig {
            worker_count: 0,
            ..ControllerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));
    }

    #[test]
    fn test_validate_rejects_base_above_max() {
        let config = ControllerConfig {
            base_retry_delay_ms: 2000,
            max_retry_delay_ms: 1000,
            ..ControllerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::BaseExceedsMax {
                base_ms: 2000,
                max_ms: 1000
            })
        );
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let config = ControllerConfig {
            cache_sync_poll_interval_ms: 0,
            ..ControllerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroPollInterval));
    }

    #[test]
    fn test_optional_durations() {
        let config = ControllerConfig {
            resync_period_secs: 30,
            cache_sync_timeout_secs: 10,
            ..ControllerConfig::default()
        };
        assert_eq!(config.resync_period(), Some(Duration::from_secs(30)));
        assert_eq!(config.cache_sync_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_backoff_strategy_parsing() {
        assert_eq!("exponential".parse::<BackoffStrategy>(), Ok(BackoffStrategy::Exponential));
        assert_eq!(" Fibonacci ".parse::<BackoffStrategy>(), Ok(BackoffStrategy::Fibonacci));
        assert_eq!(
            "linear".parse::<BackoffStrategy>(),
            Err(ConfigError::UnknownBackoffStrategy("linear".to_string()))
        );
    }

    #[test]
    fn test_rate_limiter_follows_strategy() {
        let config = ControllerConfig {
            base_retry_delay_ms: 10,
            max_retry_delay_ms: 1000,
            backoff_strategy: BackoffStrategy::Fibonacci,
            ..ControllerConfig::default()
        };
        let limiter = config.rate_limiter::<String>();
        let key = "ns/a".to_string();
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
        assert_eq!(limiter.when(&key), Duration::from_millis(20));

        let config = ControllerConfig {
            backoff_strategy: BackoffStrategy::Exponential,
            ..config
        };
        let limiter = config.rate_limiter::<String>();
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
        assert_eq!(limiter.when(&key), Duration::from_millis(20));
    }
}
