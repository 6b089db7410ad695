use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::de::{from_str_or_value, option_from_str_or_value};
use crate::error::{Error, Result};

/// Limits imposed by the remote API, fixed at construction time.
///
/// Durations are plain seconds so the struct maps one-to-one onto a config
/// file or environment variables. Every field also accepts its value as a
/// string, which is how environment overrides arrive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Steady-state pacing target; the bucket refills at this rate / 60.
    #[serde(deserialize_with = "from_str_or_value")]
    pub requests_per_minute: u32,

    /// Hard ceiling on admitted calls per UTC calendar day.
    #[serde(deserialize_with = "from_str_or_value")]
    pub requests_per_day: u64,

    /// Bucket capacity, i.e. the largest burst admitted without waiting.
    #[serde(deserialize_with = "from_str_or_value")]
    pub burst_size: u32,

    /// Minimum spacing between two calls that share a resource key.
    #[serde(deserialize_with = "from_str_or_value")]
    pub cooldown_seconds: f64,

    /// Consecutive failures after which `should_retry` turns false.
    #[serde(deserialize_with = "from_str_or_value")]
    pub max_retries: u32,

    /// Backoff after the first failure; doubles with each further failure.
    #[serde(deserialize_with = "from_str_or_value")]
    pub base_backoff: f64,

    /// Upper bound on the pre-jitter backoff.
    #[serde(deserialize_with = "from_str_or_value")]
    pub max_backoff: f64,

    /// Scale each backoff by a random factor in `[0.5, 1.5)`.
    #[serde(deserialize_with = "from_str_or_value")]
    pub jitter: bool,

    /// Cap on the per-key cooldown map. `None` keeps every key.
    #[serde(deserialize_with = "option_from_str_or_value")]
    pub max_tracked_keys: Option<usize>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            requests_per_day: 2000,
            burst_size: 5,
            cooldown_seconds: 2.0,
            max_retries: 5,
            base_backoff: 2.0,
            max_backoff: 300.0,
            jitter: true,
            max_tracked_keys: None,
        }
    }
}

impl RateLimitConfig {
    /// Tokens added to the bucket per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }

    /// Saturates at `Duration::MAX` for cooldowns too long to represent.
    pub fn cooldown(&self) -> Duration {
        match Duration::try_from_secs_f64(self.cooldown_seconds) {
            Ok(cooldown) => cooldown,
            Err(_) if self.cooldown_seconds > 0.0 => Duration::MAX,
            Err(_) => Duration::ZERO,
        }
    }

    /// Rejects configurations the limiter cannot honour.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 {
            return Err(Error::invalid("requests_per_minute", "must be greater than 0"));
        }
        if self.requests_per_day == 0 {
            return Err(Error::invalid("requests_per_day", "must be greater than 0"));
        }
        if self.burst_size == 0 {
            return Err(Error::invalid("burst_size", "must be at least 1"));
        }
        if !self.cooldown_seconds.is_finite() || self.cooldown_seconds < 0.0 {
            return Err(Error::invalid(
                "cooldown_seconds",
                format!("must be a non-negative number, got {}", self.cooldown_seconds),
            ));
        }
        if !self.base_backoff.is_finite() || self.base_backoff <= 0.0 {
            return Err(Error::invalid(
                "base_backoff",
                format!("must be a positive number, got {}", self.base_backoff),
            ));
        }
        if !self.max_backoff.is_finite() || self.max_backoff < self.base_backoff {
            return Err(Error::invalid(
                "max_backoff",
                format!(
                    "must be at least base_backoff ({}), got {}",
                    self.base_backoff, self.max_backoff
                ),
            ));
        }
        if self.max_tracked_keys == Some(0) {
            return Err(Error::invalid("max_tracked_keys", "must be at least 1 when set"));
        }
        Ok(())
    }
}
