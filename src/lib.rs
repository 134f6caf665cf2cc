//! # Reconcile Controller
//!
//! Generic core of a level-triggered Kubernetes controller.
//!
//! ```text
//! watch source ──► LocalCache ──► QueueEventHandler ──► RateLimitingQueue ──► workers ──► Reconciler
//!                                                            ▲                              │
//!                                                            └──── forget / add_rate_limited┘
//! ```
//!
//! Only keys travel through the queue. Workers read the current object from
//! the cache at dequeue time, so any number of notifications for one object
//! collapse into a single reconcile of its latest state.
//!
//! ## Module Structure
//!
//! - `queue` - deduplicating work queue with delayed and rate-limited adds
//! - `controller` - object keys, local cache, event bridge, watch sources
//! - `runtime` - reconcile contract, worker pool, error policy, lifecycle
//! - `config` - environment-driven controller settings
//! - `observability` - Prometheus metrics
//! - `server` - metrics and probe endpoints
//! - `crd` - sample `Network` custom resource
//! - `reconciler` - reconciler for the sample resource

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod queue;
pub mod reconciler;
pub mod runtime;
pub mod server;
