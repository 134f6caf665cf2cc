//! # Local Cache
//!
//! In-memory view of the watched objects, keyed by [`ObjectKey`].
//!
//! The cache is written only by the watch source and read by reconcilers.
//! Reads never touch the API server, so a reconciler may see an object that
//! is slightly behind the cluster. Level-triggered reconciliation tolerates
//! that: the next event for the key brings the cache forward and the key is
//! queued again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::key::ObjectKey;

struct Inner<K> {
    store: RwLock<HashMap<ObjectKey, Arc<K>>>,
    synced: AtomicBool,
}

/// Shared, indexed store of the latest observed objects.
///
/// Cloning produces another handle to the same store.
pub struct LocalCache<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for LocalCache<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for LocalCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for LocalCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("len", &self.len())
            .field("synced", &self.has_synced())
            .finish()
    }
}

impl<K> LocalCache<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(HashMap::new()),
                synced: AtomicBool::new(false),
            }),
        }
    }

    // A panicking writer cannot leave the map half-updated: every write is a
    // single HashMap operation. Recover the guard instead of propagating.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ObjectKey, Arc<K>>> {
        self.inner
            .store
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ObjectKey, Arc<K>>> {
        self.inner
            .store
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Latest observed object for `key`, if it still exists
    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.read().get(key).cloned()
    }

    /// Keys of all cached objects, in no particular order
    #[must_use]
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.read().keys().cloned().collect()
    }

    /// All cached objects, in no particular order
    #[must_use]
    pub fn list(&self) -> Vec<Arc<K>> {
        self.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// True once the initial listing has been loaded
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.inner.synced.load(Ordering::Acquire)
    }

    /// Store `obj` under `key`, returning the object it replaced
    pub fn insert(&self, key: ObjectKey, obj: Arc<K>) -> Option<Arc<K>> {
        self.write().insert(key, obj)
    }

    /// Remove `key`, returning the last known object
    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.write().remove(key)
    }

    /// Swap in a complete listing, returning the previous contents
    pub fn replace(&self, objects: HashMap<ObjectKey, Arc<K>>) -> HashMap<ObjectKey, Arc<K>> {
        std::mem::replace(&mut *self.write(), objects)
    }

    /// Record that the initial listing is loaded. Never reverts.
    pub fn mark_synced(&self) {
        self.inner.synced.store(true, Ordering::Release);
    }
}
