//! # Rate Limiters
//!
//! Per-key retry delay calculation for [`RateLimitingQueue`](super::RateLimitingQueue).
//!
//! Each limiter keeps a failure count per key. `when` returns the delay for the
//! next retry and records one more failure; `forget` resets the key after a
//! successful reconcile so the next failure streak starts from the base delay.
//!
//! Two strategies are provided:
//!
//! - [`ExponentialFailureRateLimiter`]: `base × 2^failures`, capped at `max`
//!   (5ms, 10ms, 20ms, 40ms, ...)
//! - [`FibonacciFailureRateLimiter`]: `base × fib(failures)`, capped at `max`
//!   (1m, 1m, 2m, 3m, 5m, 8m, ... with a one minute base). Grows more slowly
//!   than exponential backoff, which suits keys that fail for a long time.
//!
//! ## Usage
//!
//! ```rust
//! use reconcile_controller::queue::{ExponentialFailureRateLimiter, RateLimiter};
//! use std::time::Duration;
//!
//! let limiter = ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1));
//! assert_eq!(limiter.when(&"ns/foo"), Duration::from_millis(5));
//! assert_eq!(limiter.when(&"ns/foo"), Duration::from_millis(10));
//! limiter.forget(&"ns/foo");
//! assert_eq!(limiter.when(&"ns/foo"), Duration::from_millis(5));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Computes retry delays for failing keys.
pub trait RateLimiter<T>: Send + Sync {
    /// Delay before the next retry of `item`. Records one more failure.
    fn when(&self, item: &T) -> Duration;

    /// Reset the failure history of `item`.
    fn forget(&self, item: &T);

    /// Number of failures recorded for `item` since the last `forget`
    fn num_requeues(&self, item: &T) -> u32;
}

fn lock<V>(map: &Mutex<V>) -> MutexGuard<'_, V> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exponential per-key backoff: `base × 2^failures`, capped at `max`.
pub struct ExponentialFailureRateLimiter<T> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T> fmt::Debug for ExponentialFailureRateLimiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExponentialFailureRateLimiter")
            .field("base", &self.base)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl<T: Eq + Hash> ExponentialFailureRateLimiter<T> {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delay for the given number of prior failures
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl<T> RateLimiter<T> for ExponentialFailureRateLimiter<T>
where
    T: Clone + Eq + Hash + Send,
{
    fn when(&self, item: &T) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(item.clone()).or_insert(0);
        let delay = self.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    fn forget(&self, item: &T) {
        lock(&self.failures).remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        lock(&self.failures).get(item).copied().unwrap_or(0)
    }
}

/// Fibonacci backoff sequence for a single key.
///
/// Each delay is the sum of the previous two, starting `base, base`, and
/// the sequence is capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    base: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            prev: Duration::ZERO,
            current: base.min(max),
            max,
        }
    }

    /// Return the current delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    /// Restart the sequence from `base`
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.base.min(self.max);
    }
}

#[derive(Debug)]
struct FibonacciState {
    backoff: FibonacciBackoff,
    failures: u32,
}

/// Fibonacci per-key backoff, capped at `max`.
pub struct FibonacciFailureRateLimiter<T> {
    base: Duration,
    max: Duration,
    states: Mutex<HashMap<T, FibonacciState>>,
}

impl<T> fmt::Debug for FibonacciFailureRateLimiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FibonacciFailureRateLimiter")
            .field("base", &self.base)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl<T: Eq + Hash> FibonacciFailureRateLimiter<T> {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> RateLimiter<T> for FibonacciFailureRateLimiter<T>
where
    T: Clone + Eq + Hash + Send,
{
    fn when(&self, item: &T) -> Duration {
        let mut states = lock(&self.states);
        let state = states
            .entry(item.clone())
            .or_insert_with(|| FibonacciState {
                backoff: FibonacciBackoff::new(self.base, self.max),
                failures: 0,
            });
        state.failures = state.failures.saturating_add(1);
        state.backoff.next_backoff()
    }

    fn forget(&self, item: &T) {
        lock(&self.states).remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        lock(&self.states)
            .get(item)
            .map_or(0, |state| state.failures)
    }
}
