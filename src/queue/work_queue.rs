//! # Work Queue
//!
//! Deduplicating FIFO of keys with exactly-once-in-flight-per-key semantics.
//!
//! The queue tracks three disjoint sets:
//!
//! - **queued**: pending keys in insertion order
//! - **processing**: keys currently held by exactly one worker
//! - **dirty**: keys re-added while processing, reprocessed once after `done`
//!
//! All three sets live behind a single mutex. Waiting workers park on a
//! [`Notify`] rather than spinning, so `get` is the only suspension point.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::observability::metrics;

#[derive(Debug)]
struct QueueState<T> {
    queue: VecDeque<T>,
    queued: HashSet<T>,
    processing: HashSet<T>,
    dirty: HashSet<T>,
    shutting_down: bool,
}

impl<T: Clone + Eq + Hash> QueueState<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            processing: HashSet::new(),
            dirty: HashSet::new(),
            shutting_down: false,
        }
    }

    fn push(&mut self, item: T) -> bool {
        if !self.queued.insert(item.clone()) {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    fn pop(&mut self) -> Option<T> {
        let item = self.queue.pop_front()?;
        self.queued.remove(&item);
        self.processing.insert(item.clone());
        Some(item)
    }
}

struct Inner<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    available: Notify,
}

/// Concurrent-safe deduplicating work queue.
///
/// Cloning produces another handle to the same queue.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + 'static,
{
    /// Create an empty queue. `name` labels the queue's metrics and logs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(QueueState::new()),
                available: Notify::new(),
            }),
        }
    }

    /// Name used for metrics and logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // The queue never panics while holding the lock, so a poisoned mutex still
    // holds consistent sets.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `item` as needing processing.
    ///
    /// Already queued: no-op. Currently processing: marked dirty, requeued by
    /// [`WorkQueue::done`]. Ignored once the queue is shutting down.
    pub fn add(&self, item: T) {
        let depth = {
            let mut state = self.lock();
            if state.shutting_down {
                debug!(queue = %self.inner.name, item = ?item, "workqueue.add.ignored_shutting_down");
                return;
            }
            if state.processing.contains(&item) {
                state.dirty.insert(item);
                return;
            }
            if !state.push(item) {
                return;
            }
            state.queue.len()
        };

        metrics::increment_workqueue_adds(&self.inner.name);
        metrics::set_workqueue_depth(&self.inner.name, depth);
        self.inner.available.notify_one();
    }

    /// Wait until a key is available, then move it to the processing set.
    ///
    /// Returns `None` once the queue is shutting down and the queued set has
    /// drained. Keys still queued at shutdown are handed out first.
    ///
    /// Every `Some(item)` must be paired with exactly one [`WorkQueue::done`].
    pub async fn get(&self) -> Option<T> {
        loop {
            // Register interest before inspecting state so a concurrent add or
            // shutdown between the check and the await still wakes us.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.pop() {
                    metrics::set_workqueue_depth(&self.inner.name, state.queue.len());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release `item` after processing.
    ///
    /// If it was re-added while processing, it goes back on the queued set
    /// exactly once no matter how many adds happened in between.
    pub fn done(&self, item: &T) {
        let requeued_depth = {
            let mut state = self.lock();
            if !state.processing.remove(item) {
                warn!(queue = %self.inner.name, item = ?item, "workqueue.done.not_processing");
                return;
            }
            if !state.dirty.remove(item) {
                return;
            }
            state.push(item.clone());
            state.queue.len()
        };

        metrics::increment_workqueue_adds(&self.inner.name);
        metrics::set_workqueue_depth(&self.inner.name, requeued_depth);
        self.inner.available.notify_one();
    }

    /// Stop accepting new keys and wake every waiting worker.
    ///
    /// Queued keys are still handed out by `get` until the set is empty.
    /// Calling this more than once is harmless.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!(queue = %self.inner.name, "workqueue.shutdown");
        self.inner.available.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of queued keys (not counting keys being processed)
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently held by workers
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().processing.len()
    }

    /// Whether `item` is queued, processing, or marked dirty
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        let state = self.lock();
        state.queued.contains(item) || state.processing.contains(item) || state.dirty.contains(item)
    }
}
