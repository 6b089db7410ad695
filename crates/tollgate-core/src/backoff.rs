//! Failure-driven exponential backoff.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::config::RateLimitConfig;

/// Where the limiter sits in its failure state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// No failures since the last success or reset.
    Healthy,
    /// Some failures, but fewer than `max_retries`.
    Degraded,
    /// `max_retries` reached. Advisory only: `acquire` keeps working.
    Exhausted,
}

impl Health {
    pub fn classify(consecutive_failures: u32, max_retries: u32) -> Self {
        if consecutive_failures == 0 {
            Self::Healthy
        } else if consecutive_failures < max_retries {
            Self::Degraded
        } else {
            Self::Exhausted
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// The backoff curve: `base * 2^(failures - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: f64,
    max: f64,
    jitter: bool,
}

impl BackoffPolicy {
    pub fn new(base: f64, max: f64, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.base_backoff, config.max_backoff, config.jitter)
    }

    /// Pre-jitter backoff in seconds. Zero failures means no backoff.
    pub fn raw_secs(&self, consecutive_failures: u32) -> f64 {
        if consecutive_failures == 0 {
            return 0.0;
        }
        // 2^1023 is the largest finite power; past that min() takes max anyway.
        let exponent = i32::try_from(consecutive_failures - 1).unwrap_or(i32::MAX).min(1023);
        (self.base * 2f64.powi(exponent)).min(self.max)
    }

    /// Backoff for the given failure count, with jitter if enabled.
    ///
    /// Jitter scales the capped value by a factor in `[0.5, 1.5)`, so a
    /// jittered backoff can exceed `max` by up to half.
    pub fn duration(&self, consecutive_failures: u32) -> Duration {
        let raw = self.raw_secs(consecutive_failures);
        let secs = if self.jitter && raw > 0.0 {
            raw * rand::rng().random_range(0.5..1.5)
        } else {
            raw
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
