use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::backoff::Health;

/// A consistent snapshot of limiter counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    /// Admitted calls since construction.
    pub total_requests: u64,
    /// Admitted calls in the current UTC day.
    pub daily_requests: u64,
    /// Admitted calls that were told to wait first.
    pub throttled_requests: u64,
    /// Calls still available today.
    pub daily_remaining: u64,
    pub consecutive_failures: u32,
    /// Resource keys with a remembered last-request time.
    pub properties_tracked: usize,
    /// `throttled_requests / total_requests`, or 0 before the first call.
    pub throttle_rate: f64,
    pub health: Health,
    /// Time left on an active backoff window.
    #[serde(serialize_with = "serialize_secs")]
    pub backoff_remaining: Option<Duration>,
}

impl Metrics {
    pub(crate) fn throttle_rate(throttled: u64, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            throttled as f64 / total as f64
        }
    }
}

fn serialize_secs<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}
