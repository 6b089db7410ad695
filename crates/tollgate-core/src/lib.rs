//! Admission control for a quota-constrained, rate-limited remote API.
//!
//! The crate provides a [`TokenBucket`] pacing primitive and the
//! [`RateLimiter`] that combines it with per-key cooldowns, a hard daily
//! quota and failure-driven exponential backoff. Nothing here sleeps,
//! performs I/O or touches the network: callers ask how long to wait and do
//! the waiting themselves.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod backoff;
pub mod bucket;
pub mod clock;
pub mod config;
pub mod de;
pub mod error;
pub mod limiter;
pub mod metrics;

pub use backoff::{BackoffPolicy, Health};
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RateLimitConfig;
pub use error::{Error, Result};
pub use limiter::{Admission, RateLimiter, DEFAULT_KEY};
pub use metrics::Metrics;
