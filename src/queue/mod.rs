//! # Work Queue
//!
//! Rate-limited, deduplicating queue of keys shared by the event bridge and
//! the worker pool.
//!
//! ## Module Structure
//!
//! - `work_queue.rs` - queued / processing / dirty sets, `add`, `get`, `done`, `shut_down`
//! - `delaying.rs` - `add_after` via a single waiting loop
//! - `rate_limiter.rs` - per-key backoff strategies
//! - `rate_limiting.rs` - `add_rate_limited` and `forget` on top of the delaying queue

mod delaying;
mod rate_limiter;
mod rate_limiting;
mod work_queue;

pub(crate) use delaying::deadline_after;
pub use delaying::DelayingQueue;
pub use rate_limiter::{
    ExponentialFailureRateLimiter, FibonacciBackoff, FibonacciFailureRateLimiter, RateLimiter,
};
pub use rate_limiting::RateLimitingQueue;
pub use work_queue::WorkQueue;
