//! # Delaying Queue
//!
//! Adds `add_after` on top of [`WorkQueue`]. A single background task owns a
//! min-heap of pending keys and moves each one onto the work queue when its
//! ready time passes. A key scheduled more than once keeps its earliest time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::work_queue::WorkQueue;

/// Stand-in deadline for delays too large to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating to a deadline decades away instead of overflowing
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or(now + FAR_FUTURE)
}

struct Waiting<T> {
    item: T,
    ready_at: Instant,
    seq: u64,
}

impl<T> PartialEq for Waiting<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<T> Eq for Waiting<T> {}

impl<T> PartialOrd for Waiting<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so BinaryHeap pops the earliest entry first
impl<T> Ord for Waiting<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Work queue with delayed insertion.
pub struct DelayingQueue<T> {
    queue: WorkQueue<T>,
    waiting_tx: mpsc::UnboundedSender<(T, Instant)>,
    stop: CancellationToken,
}

impl<T> Clone for DelayingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            waiting_tx: self.waiting_tx.clone(),
            stop: self.stop.clone(),
        }
    }
}

impl<T> fmt::Debug for DelayingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayingQueue")
            .field("queue", &self.queue)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}

impl<T> DelayingQueue<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    /// Create the queue and spawn its waiting loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let queue = WorkQueue::new(name);
        let (waiting_tx, waiting_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        tokio::spawn(waiting_loop(queue.clone(), waiting_rx, stop.clone()));

        Self {
            queue,
            waiting_tx,
            stop,
        }
    }

    /// The underlying work queue
    #[must_use]
    pub fn queue(&self) -> &WorkQueue<T> {
        &self.queue
    }

    /// Add `item` once `delay` has elapsed. A zero delay adds immediately.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.queue.add(item);
            return;
        }
        // Send only fails after the waiting loop has exited, i.e. at shutdown
        if self
            .waiting_tx
            .send((item, deadline_after(delay)))
            .is_err()
        {
            debug!(queue = %self.queue.name(), "workqueue.add_after.dropped_loop_stopped");
        }
    }

    /// Stop the waiting loop, discarding pending delayed keys, and shut down
    /// the work queue.
    pub fn shut_down(&self) {
        self.stop.cancel();
        self.queue.shut_down();
    }
}

async fn waiting_loop<T>(
    queue: WorkQueue<T>,
    mut waiting_rx: mpsc::UnboundedReceiver<(T, Instant)>,
    stop: CancellationToken,
) where
    T: Clone + Eq + Hash + fmt::Debug + Send + 'static,
{
    let mut heap: BinaryHeap<Waiting<T>> = BinaryHeap::new();
    // Earliest ready time per key; heap entries that disagree are stale
    let mut pending: HashMap<T, Instant> = HashMap::new();
    let mut seq: u64 = 0;

    loop {
        let now = Instant::now();
        while heap.peek().is_some_and(|entry| entry.ready_at <= now) {
            let Some(entry) = heap.pop() else { break };
            if pending.get(&entry.item) == Some(&entry.ready_at) {
                pending.remove(&entry.item);
                queue.add(entry.item);
            }
        }

        let next_ready = heap.peek().map(|entry| entry.ready_at);

        tokio::select! {
            () = stop.cancelled() => break,
            () = sleep_until(next_ready) => {}
            received = waiting_rx.recv() => {
                let Some((item, ready_at)) = received else { break };
                if pending.get(&item).is_some_and(|existing| *existing <= ready_at) {
                    continue;
                }
                pending.insert(item.clone(), ready_at);
                seq = seq.wrapping_add(1);
                heap.push(Waiting { item, ready_at, seq });
            }
        }
    }

    debug!(
        queue = %queue.name(),
        discarded = pending.len(),
        "workqueue.waiting_loop.stopped"
    );
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
