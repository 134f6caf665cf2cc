//! # Rate Limiting Queue
//!
//! The queue workers actually talk to: a [`DelayingQueue`] whose retry delays
//! come from a [`RateLimiter`].

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use super::delaying::DelayingQueue;
use super::rate_limiter::RateLimiter;
use crate::observability::metrics;

/// Deduplicating, delaying, rate-limited work queue.
///
/// Cloning produces another handle to the same queue.
pub struct RateLimitingQueue<T> {
    queue: DelayingQueue<T>,
    limiter: Arc<dyn RateLimiter<T>>,
}

impl<T> Clone for RateLimitingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<T> fmt::Debug for RateLimitingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitingQueue")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    /// Create the queue and spawn its waiting loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(name: impl Into<String>, limiter: Arc<dyn RateLimiter<T>>) -> Self {
        Self {
            queue: DelayingQueue::new(name),
            limiter,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.queue.queue().name()
    }

    /// See [`WorkQueue::add`](super::WorkQueue::add)
    pub fn add(&self, item: T) {
        self.queue.queue().add(item);
    }

    /// Add `item` after `delay` without touching its failure history
    pub fn add_after(&self, item: T, delay: Duration) {
        self.queue.add_after(item, delay);
    }

    /// Schedule a retry of `item` after the limiter's backoff for it.
    ///
    /// Records one more failure and returns the delay that was scheduled.
    pub fn add_rate_limited(&self, item: T) -> Duration {
        let delay = self.limiter.when(&item);
        metrics::increment_workqueue_retries(self.name());
        self.queue.add_after(item, delay);
        delay
    }

    /// Clear the failure history of `item`. Does not remove it from the queue.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    /// Failures recorded for `item` since it was last forgotten
    #[must_use]
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// See [`WorkQueue::get`](super::WorkQueue::get)
    pub async fn get(&self) -> Option<T> {
        self.queue.queue().get().await
    }

    /// See [`WorkQueue::done`](super::WorkQueue::done)
    pub fn done(&self, item: &T) {
        self.queue.queue().done(item);
    }

    /// Stop delayed insertion and begin draining. Idempotent.
    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.queue.queue().is_shutting_down()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.queue().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.queue().is_empty()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.queue.queue().in_flight()
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.queue.queue().contains(item)
    }
}
