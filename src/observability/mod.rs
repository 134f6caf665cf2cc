//! # Observability
//!
//! Prometheus metrics for reconciles and the work queue, served by
//! [`crate::server`].

pub mod metrics;
