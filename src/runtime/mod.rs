//! # Runtime
//!
//! Reconcile side of the controller.
//!
//! - `worker`: the `Reconciler` contract and the per-worker loop
//! - `error_policy`: reconcile outcome handling and watch error classification
//! - `sync`: startup cache-sync gate and periodic resync
//! - `lifecycle`: `Controller` and its state machine

pub mod error_policy;
mod lifecycle;
mod sync;
mod worker;

pub use lifecycle::{Controller, ControllerError, LifecycleState};
pub use sync::{run_resync, wait_for_cache_sync};
pub use worker::{process_next_item, run_worker, Action, Reconciler, ReconcilerError};
