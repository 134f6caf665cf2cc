//! # Watch Source
//!
//! Feeds the local cache from a stream of watch events and notifies the
//! event bridge of every change.
//!
//! [`KubeWatchSource`] is the production source backed by a Kubernetes
//! list-then-watch. [`Reflector`] holds the event-to-cache logic and is shared
//! with any other source that speaks [`watcher::Event`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{pin_mut, Stream, StreamExt};
use kube::{Api, Resource};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::LocalCache;
use super::events::{EventHandler, Notification};
use super::key::{object_key, ObjectKey};
use crate::observability::metrics;
use crate::runtime::error_policy::handle_watch_error;

/// Producer of cache contents and change notifications.
///
/// `run` populates `cache`, calls `cache.mark_synced()` once the initial
/// listing is loaded, invokes `handler` after every cache change, and returns
/// when `shutdown` is cancelled.
#[async_trait]
pub trait WatchSource<K>: Send + 'static {
    async fn run(
        self: Box<Self>,
        cache: LocalCache<K>,
        handler: Arc<dyn EventHandler<K>>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Applies watch events to a [`LocalCache`].
///
/// A relist (`Init`, `InitApply`..., `InitDone`) is buffered and swapped in
/// atomically at `InitDone`. Objects missing from the new listing produce
/// `Deleted`, so deletions missed while disconnected still reach the queue.
pub struct Reflector<K> {
    cache: LocalCache<K>,
    relist: Option<HashMap<ObjectKey, Arc<K>>>,
}

impl<K> fmt::Debug for Reflector<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reflector")
            .field("cached", &self.cache.len())
            .field("relisting", &self.relist.is_some())
            .finish_non_exhaustive()
    }
}

impl<K> Reflector<K>
where
    K: Resource,
{
    #[must_use]
    pub fn new(cache: LocalCache<K>) -> Self {
        Self {
            cache,
            relist: None,
        }
    }

    fn key_of(obj: &K) -> Option<ObjectKey> {
        match object_key(obj) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Skipping watched object without a usable key");
                metrics::increment_key_extraction_errors();
                None
            }
        }
    }

    /// Apply one event to the cache and return the resulting notifications
    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<Notification<K>> {
        match event {
            watcher::Event::Apply(obj) => {
                let Some(key) = Self::key_of(&obj) else {
                    return Vec::new();
                };
                let new = Arc::new(obj);
                match self.cache.insert(key, Arc::clone(&new)) {
                    Some(old) => vec![Notification::Updated { old, new }],
                    None => vec![Notification::Added(new)],
                }
            }
            watcher::Event::Delete(obj) => {
                let Some(key) = Self::key_of(&obj) else {
                    return Vec::new();
                };
                let last_known = self.cache.remove(&key).unwrap_or_else(|| Arc::new(obj));
                vec![Notification::Deleted(last_known)]
            }
            watcher::Event::Init => {
                debug!("Relist started");
                self.relist = Some(HashMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(key) = Self::key_of(&obj) {
                    self.relist
                        .get_or_insert_with(HashMap::new)
                        .insert(key, Arc::new(obj));
                }
                Vec::new()
            }
            watcher::Event::InitDone => {
                let listing = self.relist.take().unwrap_or_default();
                let mut notifications = Vec::with_capacity(listing.len());
                for (key, new) in &listing {
                    notifications.push(match self.cache.get(key) {
                        Some(old) => Notification::Updated {
                            old,
                            new: Arc::clone(new),
                        },
                        None => Notification::Added(Arc::clone(new)),
                    });
                }

                let previous = self.cache.replace(listing);
                let objects = self.cache.len();
                for (key, old) in previous {
                    if self.cache.get(&key).is_none() {
                        notifications.push(Notification::Deleted(old));
                    }
                }

                if !self.cache.has_synced() {
                    info!(objects, "Initial listing loaded, cache synced");
                }
                self.cache.mark_synced();
                notifications
            }
        }
    }
}

/// Drive `events` into the cache until the stream ends or `shutdown` fires.
///
/// Stream errors are logged and classified; the stream is expected to retry
/// on its own.
pub async fn reflect<K, S, E>(
    events: S,
    reflector: &mut Reflector<K>,
    handler: &dyn EventHandler<K>,
    shutdown: &CancellationToken,
) where
    K: Resource,
    S: Stream<Item = Result<watcher::Event<K>, E>>,
    E: fmt::Display,
{
    pin_mut!(events);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("Watch source cancelled");
                return;
            }
            next = events.next() => match next {
                Some(Ok(event)) => {
                    for notification in reflector.apply(event) {
                        notification.dispatch(handler);
                    }
                }
                Some(Err(e)) => {
                    handle_watch_error(&e.to_string());
                }
                None => {
                    warn!("Watch stream ended");
                    return;
                }
            }
        }
    }
}

/// Watch source backed by a Kubernetes list-then-watch
pub struct KubeWatchSource<K> {
    api: Api<K>,
    config: watcher::Config,
}

impl<K> fmt::Debug for KubeWatchSource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeWatchSource")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<K> KubeWatchSource<K> {
    #[must_use]
    pub fn new(api: Api<K>, config: watcher::Config) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl<K> WatchSource<K> for KubeWatchSource<K>
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    async fn run(
        self: Box<Self>,
        cache: LocalCache<K>,
        handler: Arc<dyn EventHandler<K>>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("Starting watch");
        let events = watcher(self.api, self.config).default_backoff();
        let mut reflector = Reflector::new(cache);
        reflect(events, &mut reflector, handler.as_ref(), &shutdown).await;

        if shutdown.is_cancelled() {
            info!("Watch stopped");
            Ok(())
        } else {
            Err(anyhow::anyhow!("watch stream ended unexpectedly"))
        }
    }
}
