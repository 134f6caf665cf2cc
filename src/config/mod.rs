//! # Configuration
//!
//! Controller settings loaded from environment variables.

mod controller;

pub use controller::{BackoffStrategy, ConfigError, ControllerConfig};
