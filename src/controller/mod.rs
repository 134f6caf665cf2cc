//! # Controller
//!
//! Observation side of the controller: from watch events to queued keys.
//!
//! - `key`: object identity used for deduplication
//! - `cache`: local indexed store read by reconcilers
//! - `events`: event bridge from cache notifications to the work queue
//! - `source`: watch sources that populate the cache

mod cache;
mod events;
mod key;
mod source;

pub use cache::LocalCache;
pub use events::{EventHandler, Notification, QueueEventHandler};
pub use key::{object_key, KeyError, ObjectKey};
pub use source::{reflect, KubeWatchSource, Reflector, WatchSource};
