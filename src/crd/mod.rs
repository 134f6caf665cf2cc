//! # Custom Resource Definitions
//!
//! CRD types for the bundled sample controller.

mod network;

pub use network::{Network, NetworkSpec};
