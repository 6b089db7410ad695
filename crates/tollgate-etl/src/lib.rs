//! Ingestion-side plumbing for tollgate.
//!
//! Loads limiter configuration, runs provider calls through the
//! admit / sleep / call / report protocol, and fans calls out over a pool of
//! tokio workers that share one [`tollgate_core::RateLimiter`].

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod pool;

pub use admission::{call_with_admission, wait_for_admission, RetryPolicy};
pub use clock::TokioClock;
pub use config::Config;
pub use error::{IngestError, IngestResult};
pub use pool::{Fetcher, IngestPool, IngestReport, KeyOutcome};
