//! # Worker
//!
//! The reconcile contract and the loop each worker runs against the queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

use super::error_policy::handle_reconcile_result;
use crate::controller::{LocalCache, ObjectKey};
use crate::observability::metrics;
use crate::queue::RateLimitingQueue;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Transient failure, retried with backoff
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
    /// Failure that retrying cannot fix; the key is dropped until its next event
    #[error("Reconciliation failed permanently: {0}")]
    Permanent(#[source] anyhow::Error),
    #[error("Reconciler panicked: {0}")]
    Panicked(String),
}

impl ReconcilerError {
    /// Wrap an error that should not be retried
    pub fn permanent(error: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(error.into())
    }
}

/// What to do with a key after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Do nothing until the next change to the object
    #[must_use]
    pub const fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Check the object again after `duration`, without counting a failure
    #[must_use]
    pub const fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    #[must_use]
    pub const fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// Domain logic that drives one object toward its desired state.
///
/// `obj` is the cache snapshot for `key` at dequeue time; `None` means the
/// object was deleted or never observed. Implementations must be idempotent:
/// the same key may be reconciled any number of times.
#[async_trait]
pub trait Reconciler<K>: Send + Sync + 'static {
    async fn reconcile(&self, key: &ObjectKey, obj: Option<Arc<K>>)
        -> Result<Action, ReconcilerError>;
}

/// Calls `done` for the held key on every exit path
struct DoneGuard<'a> {
    queue: &'a RateLimitingQueue<ObjectKey>,
    key: &'a ObjectKey,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
        metrics::set_workqueue_depth(self.queue.name(), self.queue.len());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Take one key from the queue and reconcile it.
///
/// Returns `false` once the queue is shut down and drained.
pub async fn process_next_item<K>(
    queue: &RateLimitingQueue<ObjectKey>,
    cache: &LocalCache<K>,
    reconciler: &dyn Reconciler<K>,
) -> bool
where
    K: Send + Sync + 'static,
{
    let Some(key) = queue.get().await else {
        return false;
    };
    let _done = DoneGuard { queue, key: &key };

    let obj = cache.get(&key);
    let span = info_span!("reconcile", key = %key, exists = obj.is_some());
    let start = Instant::now();

    let result = AssertUnwindSafe(reconciler.reconcile(&key, obj))
        .catch_unwind()
        .instrument(span.clone())
        .await
        .unwrap_or_else(|panic| {
            Err(ReconcilerError::Panicked(panic_message(panic.as_ref())))
        });

    metrics::increment_reconciliations();
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    span.in_scope(|| handle_reconcile_result(queue, &key, result));
    true
}

/// Reconcile keys until the queue reports shutdown
pub async fn run_worker<K>(
    id: usize,
    queue: RateLimitingQueue<ObjectKey>,
    cache: LocalCache<K>,
    reconciler: Arc<dyn Reconciler<K>>,
) where
    K: Send + Sync + 'static,
{
    debug!(worker = id, "Worker started");
    while process_next_item(&queue, &cache, reconciler.as_ref()).await {}
    info!(worker = id, "Worker stopped, queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ExponentialFailureRateLimiter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> RateLimitingQueue<ObjectKey> {
        RateLimitingQueue::new(
            "worker-unit-test",
            Arc::new(ExponentialFailureRateLimiter::new(
                Duration::from_millis(5),
                Duration::from_secs(1),
            )),
        )
    }

    struct Scripted {
        calls: AtomicUsize,
        outcome: fn(usize) -> Result<Action, ReconcilerError>,
    }

    #[async_trait]
    impl Reconciler<String> for Scripted {
        async fn reconcile(
            &self,
            _key: &ObjectKey,
            _obj: Option<Arc<String>>,
        ) -> Result<Action, ReconcilerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(call)
        }
    }

    #[test]
    fn test_action_constructors() {
        assert_eq!(Action::await_change().requeue_after(), None);
        assert_eq!(
            Action::requeue(Duration::from_secs(3)).requeue_after(),
            Some(Duration::from_secs(3))
        );
        assert_eq!(Action::default(), Action::await_change());
    }

    #[test]
    fn test_anyhow_converts_to_transient_failure() {
        let err: ReconcilerError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, ReconcilerError::ReconciliationFailed(_)));
        assert!(matches!(
            ReconcilerError::permanent(anyhow::anyhow!("bad spec")),
            ReconcilerError::Permanent(_)
        ));
    }

    #[tokio::test]
    async fn test_success_forgets_and_releases_key() {
        let q = queue();
        let cache = LocalCache::<String>::new();
        let key = ObjectKey::namespaced("ns", "foo");
        let reconciler = Scripted {
            calls: AtomicUsize::new(0),
            outcome: |_| Ok(Action::await_change()),
        };

        q.add(key.clone());
        assert!(process_next_item(&q, &cache, &reconciler).await);

        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(q.num_requeues(&key), 0);
        assert_eq!(q.in_flight(), 0);
        assert!(!q.contains(&key));
        q.shut_down();
    }

    #[tokio::test]
    async fn test_failure_schedules_rate_limited_retry() {
        let q = queue();
        let cache = LocalCache::<String>::new();
        let key = ObjectKey::namespaced("ns", "bar");
        let reconciler = Scripted {
            calls: AtomicUsize::new(0),
            outcome: |_| Err(anyhow::anyhow!("backend unavailable").into()),
        };

        q.add(key.clone());
        assert!(process_next_item(&q, &cache, &reconciler).await);
        assert_eq!(q.num_requeues(&key), 1);
        assert_eq!(q.in_flight(), 0);

        let retried = tokio::time::timeout(Duration::from_secs(1), q.get())
            .await
            .unwrap();
        assert_eq!(retried, Some(key.clone()));
        q.done(&key);
        q.shut_down();
    }

    #[tokio::test]
    async fn test_panic_is_retried_and_key_released() {
        let q = queue();
        let cache = LocalCache::<String>::new();
        let key = ObjectKey::namespaced("ns", "panics");
        let reconciler = Scripted {
            calls: AtomicUsize::new(0),
            outcome: |_| panic!("reconciler bug"),
        };

        q.add(key.clone());
        assert!(process_next_item(&q, &cache, &reconciler).await);
        assert_eq!(q.in_flight(), 0);
        assert_eq!(q.num_requeues(&key), 1);
        q.shut_down();
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let q = queue();
        let cache = LocalCache::<String>::new();
        let key = ObjectKey::namespaced("ns", "invalid");
        let reconciler = Scripted {
            calls: AtomicUsize::new(0),
            outcome: |_| Err(ReconcilerError::permanent(anyhow::anyhow!("bad spec"))),
        };

        q.add(key.clone());
        assert!(process_next_item(&q, &cache, &reconciler).await);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(q.num_requeues(&key), 0);
        assert!(q.is_empty());
        q.shut_down();
    }

    #[tokio::test]
    async fn test_oversized_requeue_keeps_worker_alive() {
        let q = queue();
        let reconciler = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            outcome: |_| Ok(Action::requeue(Duration::MAX)),
        });
        q.add(ObjectKey::namespaced("ns", "a"));
        q.add(ObjectKey::namespaced("ns", "b"));

        let worker = tokio::spawn(run_worker(
            0,
            q.clone(),
            LocalCache::new(),
            Arc::clone(&reconciler) as Arc<dyn Reconciler<String>>,
        ));

        let deadline = Instant::now() + Duration::from_secs(1);
        while reconciler.calls.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
        // Let the second result be handled before checking the worker
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!worker.is_finished());
        assert!(q.is_empty());

        q.shut_down();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_exits_after_shutdown() {
        let q = queue();
        q.shut_down();
        let reconciler: Arc<dyn Reconciler<String>> = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            outcome: |_| Ok(Action::await_change()),
        });

        tokio::time::timeout(
            Duration::from_secs(1),
            run_worker(0, q, LocalCache::new(), reconciler),
        )
        .await
        .unwrap();
    }
}
