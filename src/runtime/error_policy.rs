//! # Error Policy
//!
//! Decides what happens to a key after each reconcile attempt, and classifies
//! watch stream errors.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::worker::{Action, ReconcilerError};
use crate::controller::ObjectKey;
use crate::observability::metrics;
use crate::queue::RateLimitingQueue;

/// Apply the outcome of one reconcile attempt to the queue.
///
/// Success clears the key's failure history and optionally schedules a
/// periodic re-check. Transient failures and panics retry with backoff.
/// Permanent failures clear the history and drop the key.
pub fn handle_reconcile_result(
    queue: &RateLimitingQueue<ObjectKey>,
    key: &ObjectKey,
    result: Result<Action, ReconcilerError>,
) {
    match result {
        Ok(action) => {
            queue.forget(key);
            match action.requeue_after() {
                Some(delay) => {
                    debug!(
                        requeue_after_ms = delay.as_millis() as u64,
                        "Reconciled, requeue scheduled"
                    );
                    metrics::increment_requeues_total("requeue-after");
                    queue.add_after(key.clone(), delay);
                }
                None => debug!("Reconciled successfully"),
            }
        }
        Err(ReconcilerError::Permanent(e)) => {
            error!(
                error = %e,
                "❌ Reconciliation failed permanently, not retrying until the object changes"
            );
            metrics::increment_reconciliation_errors();
            metrics::increment_reconciliations_abandoned();
            queue.forget(key);
        }
        Err(e) => {
            metrics::increment_reconciliation_errors();
            let attempt = queue.num_requeues(key) + 1;
            let delay = queue.add_rate_limited(key.clone());
            let next_retry = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| Utc::now().checked_add_signed(delay))
                .map_or_else(|| "unbounded".to_string(), |t| t.to_rfc3339());

            error!(attempt, error = %e, "Reconciliation error");
            info!(
                attempt,
                backoff_ms = delay.as_millis() as u64,
                next_retry = %next_retry,
                "🔄 Retrying with backoff (trigger source: error-backoff)"
            );
            metrics::increment_requeues_total("error-backoff");
        }
    }
}

/// Broad category of a watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401, credentials or RBAC revoked
    Unauthorized,
    /// 410, resource version too old; the watcher relists
    Expired,
    /// 429, API server busy or reinitializing storage
    Throttled,
    /// 404, resource type missing or CRD not installed
    NotFound,
    Other,
}

impl WatchErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Expired => "expired",
            Self::Throttled => "throttled",
            Self::NotFound => "not-found",
            Self::Other => "other",
        }
    }
}

/// Classify a watch error from its rendered message.
///
/// 404 is checked before 401: a plain-text 404 body surfaces as a decode
/// error whose chain can also mention the failed watch.
#[must_use]
pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    let is_not_found =
        error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
    if is_not_found {
        return WatchErrorKind::NotFound;
    }
    if error.contains("401") || error.contains("Unauthorized") {
        return WatchErrorKind::Unauthorized;
    }
    if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error.contains("429")
        || error.contains("storage is (re)initializing")
        || error.contains("TooManyRequests")
    {
        return WatchErrorKind::Throttled;
    }
    WatchErrorKind::Other
}

/// Log a watch stream error at a level matching its kind.
///
/// Retry is left to the watcher's own backoff.
pub fn handle_watch_error(error: &str) -> WatchErrorKind {
    let kind = classify_watch_error(error);
    match kind {
        WatchErrorKind::Unauthorized => {
            error!(
                error_type = kind.as_str(),
                error,
                "❌ Watch authentication failed (401 Unauthorized), RBAC may have been revoked or the token expired"
            );
            error!("   Verify the ServiceAccount can still list and watch the resource: kubectl auth can-i watch <resource> --as=system:serviceaccount:<namespace>:<name>");
        }
        WatchErrorKind::Expired => {
            warn!(
                error_type = kind.as_str(),
                "Watch resource version expired (410), relisting"
            );
        }
        WatchErrorKind::Throttled => {
            warn!(
                error_type = kind.as_str(),
                error, "API server throttling or reinitializing storage (429), backing off"
            );
        }
        WatchErrorKind::NotFound => {
            warn!(
                error_type = kind.as_str(),
                error, "Watched resource not found (404), the CRD may be missing"
            );
        }
        WatchErrorKind::Other => {
            error!(error_type = kind.as_str(), error, "Watch stream error");
        }
    }
    kind
}
