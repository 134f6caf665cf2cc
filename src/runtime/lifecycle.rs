//! # Controller Lifecycle
//!
//! Wires the watch source, cache, event bridge, queue and worker pool
//! together and drives them through
//! `Created -> CacheSyncing -> Running -> ShuttingDown -> Stopped`.
//!
//! A controller that fails or is cancelled during `CacheSyncing` goes straight
//! to `Stopped` without starting any worker.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kube::Resource;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::sync::{run_resync, wait_for_cache_sync};
use super::worker::{run_worker, Reconciler};
use crate::config::{ConfigError, ControllerConfig};
use crate::controller::{EventHandler, LocalCache, ObjectKey, QueueEventHandler, WatchSource};
use crate::queue::RateLimitingQueue;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Invalid controller configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Cancelled before the cache finished its initial sync")]
    CacheSyncCancelled,
    #[error("Cache did not finish its initial sync within {0:?}")]
    CacheSyncTimedOut(Duration),
    #[error("Watch source stopped: {0}")]
    WatchSourceFailed(#[source] anyhow::Error),
}

/// Where a controller is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    CacheSyncing,
    Running,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CacheSyncing => "cache-syncing",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
        }
    }

    /// Whether `next` directly follows `self`
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::CacheSyncing)
                | (Self::CacheSyncing, Self::Running | Self::Stopped)
                | (Self::Running, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A level-triggered controller for objects of type `K`
pub struct Controller<K> {
    config: ControllerConfig,
    queue: RateLimitingQueue<ObjectKey>,
    cache: LocalCache<K>,
    source: Box<dyn WatchSource<K>>,
    reconciler: Arc<dyn Reconciler<K>>,
    state: watch::Sender<LifecycleState>,
}

impl<K> fmt::Debug for Controller<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &*self.state.borrow())
            .field("queue", &self.queue)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<K> Controller<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// Build a controller in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidConfig`] if `config` fails validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        config: ControllerConfig,
        source: impl WatchSource<K>,
        reconciler: Arc<dyn Reconciler<K>>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let queue = RateLimitingQueue::new(config.queue_name.clone(), config.rate_limiter());
        let (state, _) = watch::channel(LifecycleState::Created);

        Ok(Self {
            config,
            queue,
            cache: LocalCache::new(),
            source: Box::new(source),
            reconciler,
            state,
        })
    }

    /// Handle to the work queue, for inspection
    #[must_use]
    pub fn queue(&self) -> &RateLimitingQueue<ObjectKey> {
        &self.queue
    }

    /// Handle to the local cache, for reconcilers that read other objects
    #[must_use]
    pub fn cache(&self) -> &LocalCache<K> {
        &self.cache
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Workers start only after the cache reports synced. On cancellation the
    /// watch source is stopped, the queue drains, and every worker is joined
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache never syncs (cancelled, timed out, or the
    /// watch source exited), or if the watch source stops while running.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        let Self {
            config,
            queue,
            cache,
            source,
            reconciler,
            state,
        } = self;

        transition(&state, LifecycleState::CacheSyncing);
        let source_shutdown = shutdown.child_token();
        let handler: Arc<dyn EventHandler<K>> = Arc::new(QueueEventHandler::new(queue.clone()));
        let mut source_task = tokio::spawn(source.run(
            cache.clone(),
            Arc::clone(&handler),
            source_shutdown.clone(),
        ));
        let mut source_finished = false;

        info!("Waiting for cache to sync");
        let synced = tokio::select! {
            biased;
            result = wait_for_cache_sync(
                || cache.has_synced(),
                config.cache_sync_poll_interval(),
                config.cache_sync_timeout(),
                &shutdown,
            ) => result,
            joined = &mut source_task => {
                source_finished = true;
                Err(ControllerError::WatchSourceFailed(source_exit_error(joined)))
            }
        };

        if let Err(e) = synced {
            error!(error = %e, "Cache sync failed, not starting workers");
            source_shutdown.cancel();
            queue.shut_down();
            if !source_finished {
                log_source_exit(source_task.await);
            }
            transition(&state, LifecycleState::Stopped);
            return Err(e);
        }

        transition(&state, LifecycleState::Running);
        info!(workers = config.worker_count, objects = cache.len(), "Starting workers");

        let mut workers = JoinSet::new();
        for id in 0..config.worker_count {
            workers.spawn(run_worker(
                id,
                queue.clone(),
                cache.clone(),
                Arc::clone(&reconciler),
            ));
        }

        let resync_task = config.resync_period().map(|period| {
            info!(period_secs = period.as_secs(), "Periodic resync enabled");
            tokio::spawn(run_resync(
                cache.clone(),
                Arc::clone(&handler),
                period,
                source_shutdown.clone(),
            ))
        });

        let mut outcome = Ok(());
        tokio::select! {
            biased;
            () = shutdown.cancelled() => info!("Shutdown requested"),
            joined = &mut source_task => {
                source_finished = true;
                let e = source_exit_error(joined);
                error!(error = %e, "Watch source stopped while running, shutting down");
                outcome = Err(ControllerError::WatchSourceFailed(e));
            }
        }

        transition(&state, LifecycleState::ShuttingDown);
        source_shutdown.cancel();
        queue.shut_down();

        info!(
            queued = queue.len(),
            in_flight = queue.in_flight(),
            "Waiting for workers to drain the queue"
        );
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
        if let Some(resync_task) = resync_task {
            if let Err(e) = resync_task.await {
                error!(error = %e, "Resync task failed");
            }
        }
        if !source_finished {
            log_source_exit(source_task.await);
        }

        transition(&state, LifecycleState::Stopped);
        info!("Controller stopped gracefully");
        outcome
    }
}

fn transition(state: &watch::Sender<LifecycleState>, next: LifecycleState) {
    state.send_if_modified(|current| {
        if current.can_transition_to(next) {
            info!(from = %current, to = %next, "Controller state transition");
            *current = next;
            true
        } else {
            warn!(from = %current, to = %next, "Ignoring invalid controller state transition");
            false
        }
    });
}

fn source_exit_error(joined: Result<anyhow::Result<()>, JoinError>) -> anyhow::Error {
    match joined {
        Ok(Ok(())) => anyhow::anyhow!("watch source exited"),
        Ok(Err(e)) => e,
        Err(e) => anyhow::Error::new(e).context("watch source task failed"),
    }
}

fn log_source_exit(joined: Result<anyhow::Result<()>, JoinError>) {
    match joined {
        Ok(Ok(())) => info!("Watch source stopped"),
        Ok(Err(e)) => warn!(error = %e, "Watch source stopped with error"),
        Err(e) => error!(error = %e, "Watch source task failed"),
    }
}
