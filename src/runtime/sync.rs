//! # Cache Sync
//!
//! Startup gate on the initial listing, and periodic resync.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::lifecycle::ControllerError;
use crate::controller::{EventHandler, LocalCache};
use crate::queue::deadline_after;

/// Wait until `has_synced` reports true.
///
/// Polls every `poll_interval`. Fails with
/// [`ControllerError::CacheSyncCancelled`] if `shutdown` fires first, or
/// [`ControllerError::CacheSyncTimedOut`] once `timeout` elapses.
pub async fn wait_for_cache_sync<F>(
    has_synced: F,
    poll_interval: Duration,
    timeout: Option<Duration>,
    shutdown: &CancellationToken,
) -> Result<(), ControllerError>
where
    F: Fn() -> bool,
{
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep_until(deadline_after(timeout)).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if has_synced() {
            return Ok(());
        }
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(ControllerError::CacheSyncCancelled),
            () = &mut deadline => {
                return Err(ControllerError::CacheSyncTimedOut(timeout.unwrap_or_default()));
            }
            _ = poll.tick() => debug!("Cache not yet synced"),
        }
    }
}

/// Re-deliver every cached object as an update once per `period`.
///
/// Lets reconcilers correct drift the watch never reported.
pub async fn run_resync<K>(
    cache: LocalCache<K>,
    handler: Arc<dyn EventHandler<K>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticks = tokio::time::interval_at(deadline_after(period), period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticks.tick() => {
                let objects = cache.list();
                debug!(objects = objects.len(), "Resyncing cache");
                for obj in objects {
                    handler.on_update(Arc::clone(&obj), obj);
                }
            }
        }
    }
}
