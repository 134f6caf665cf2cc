//! # Event Bridge
//!
//! Turns cache notifications into queued keys.
//!
//! Handlers only enqueue. They never reconcile inline and never block the
//! watch source, so a slow reconciler cannot stall cache updates.

use std::sync::Arc;

use kube::Resource;
use tracing::{debug, warn};

use super::key::{object_key, ObjectKey};
use crate::observability::metrics;
use crate::queue::RateLimitingQueue;

/// A change applied to the local cache
#[derive(Debug)]
pub enum Notification<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

impl<K> Clone for Notification<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Added(obj) => Self::Added(Arc::clone(obj)),
            Self::Updated { old, new } => Self::Updated {
                old: Arc::clone(old),
                new: Arc::clone(new),
            },
            Self::Deleted(obj) => Self::Deleted(Arc::clone(obj)),
        }
    }
}

impl<K> Notification<K> {
    /// Deliver this notification to the matching handler callback
    pub fn dispatch(self, handler: &dyn EventHandler<K>) {
        match self {
            Self::Added(obj) => handler.on_add(obj),
            Self::Updated { old, new } => handler.on_update(old, new),
            Self::Deleted(obj) => handler.on_delete(obj),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Callbacks invoked by the watch source after each cache change
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: Arc<K>);
    fn on_update(&self, old: Arc<K>, new: Arc<K>);
    fn on_delete(&self, obj: Arc<K>);
}

/// Event handler that enqueues the key of every changed object.
///
/// Updates enqueue the new object's key unconditionally, including periodic
/// resyncs where old and new are identical. Deletes enqueue the key of the
/// last known object so the reconciler observes its absence.
#[derive(Debug, Clone)]
pub struct QueueEventHandler {
    queue: RateLimitingQueue<ObjectKey>,
}

impl QueueEventHandler {
    #[must_use]
    pub fn new(queue: RateLimitingQueue<ObjectKey>) -> Self {
        Self { queue }
    }

    fn enqueue<K: Resource>(&self, obj: &K, event: &'static str) {
        match object_key(obj) {
            Ok(key) => {
                debug!(key = %key, event, "Enqueuing object key");
                self.queue.add(key);
            }
            Err(e) => {
                warn!(event, error = %e, "Dropping event for object without a usable key");
                metrics::increment_key_extraction_errors();
            }
        }
    }
}

impl<K> EventHandler<K> for QueueEventHandler
where
    K: Resource + Send + Sync,
{
    fn on_add(&self, obj: Arc<K>) {
        self.enqueue(obj.as_ref(), "add");
    }

    fn on_update(&self, _old: Arc<K>, new: Arc<K>) {
        self.enqueue(new.as_ref(), "update");
    }

    fn on_delete(&self, obj: Arc<K>) {
        self.enqueue(obj.as_ref(), "delete");
    }
}
