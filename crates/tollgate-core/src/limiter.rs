//! The admission controller every outbound call goes through.
//!
//! [`RateLimiter`] layers four policies over one [`TokenBucket`]:
//!
//! 1. **Backoff**: after provider failures, refuse everything until an
//!    exponentially growing deadline passes.
//! 2. **Daily quota**: a hard cap on admitted calls per UTC day.
//! 3. **Cooldown**: a minimum gap between calls that share a resource key
//!    (a property URL, say). Distinct keys never block each other.
//! 4. **Pacing**: the bucket's steady-state rate, with bursts up to its
//!    capacity.
//!
//! `acquire` never sleeps. It returns how long the caller should wait and
//! leaves the waiting to the caller, so the lock is only ever held for a
//! little arithmetic and one map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::backoff::{BackoffPolicy, Health};
use crate::bucket::TokenBucket;
use crate::clock::{until_next_utc_midnight, Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::metrics::Metrics;

/// The resource key used when a caller passes `None`.
pub const DEFAULT_KEY: &str = "";

/// What `admit` decided, and how long the caller has to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call is admitted and counted. Sleep `wait`, then make the call.
    Granted { wait: Duration },
    /// Refused while a failure backoff is active. Sleep, then ask again.
    Backoff { wait: Duration },
    /// Refused because today's quota is spent. `wait` runs to UTC midnight.
    QuotaExhausted { wait: Duration },
}

impl Admission {
    pub fn wait(&self) -> Duration {
        match self {
            Self::Granted { wait } | Self::Backoff { wait } | Self::QuotaExhausted { wait } => *wait,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Thread-safe admission controller.
///
/// Share it between workers with an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    // The bucket's own lock is only ever taken while this one is held.
    bucket: TokenBucket,
    total_requests: u64,
    daily_requests: u64,
    throttled_requests: u64,
    daily_reset_date: NaiveDate,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
    per_key_last_request: HashMap<String, Instant>,
}

impl LimiterState {
    /// Starts a new quota day if the UTC date moved. Returns the count the
    /// previous day ended with.
    fn roll_over(&mut self, today: NaiveDate) -> Option<u64> {
        if today == self.daily_reset_date {
            return None;
        }
        let previous = self.daily_requests;
        self.daily_requests = 0;
        self.daily_reset_date = today;
        Some(previous)
    }

    fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.backoff_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    fn remember(&mut self, key: &str, now: Instant, max_keys: Option<usize>) {
        if let Some(last) = self.per_key_last_request.get_mut(key) {
            *last = now;
            return;
        }

        if let Some(max_keys) = max_keys {
            while self.per_key_last_request.len() >= max_keys {
                let oldest = self
                    .per_key_last_request
                    .iter()
                    .min_by_key(|(_, at)| **at)
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(oldest) => {
                        self.per_key_last_request.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        self.per_key_last_request.insert(key.to_owned(), now);
    }
}

impl RateLimiter {
    /// Creates a limiter on the system clock.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidConfig`] if the configuration fails
    /// [`RateLimitConfig::validate`].
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a limiter on the given clock.
    ///
    /// # Errors
    /// Same as [`RateLimiter::new`].
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let bucket = TokenBucket::unchecked(
            f64::from(config.burst_size),
            config.refill_rate(),
            Arc::clone(&clock),
        );
        let state = LimiterState {
            bucket,
            total_requests: 0,
            daily_requests: 0,
            throttled_requests: 0,
            daily_reset_date: clock.today(),
            consecutive_failures: 0,
            backoff_until: None,
            per_key_last_request: HashMap::new(),
        };

        Self {
            backoff: BackoffPolicy::from_config(&config),
            config,
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Asks to make one call against `key` and returns how long to wait.
    ///
    /// A zero or positive wait from the pacing and cooldown checks means the
    /// call has been admitted and counted. While backing off or out of quota
    /// nothing is counted and the caller should ask again after waiting. Use
    /// [`RateLimiter::admit`] to tell these cases apart.
    pub fn acquire(&self, key: Option<&str>) -> Duration {
        self.admit(key).wait()
    }

    /// Same algorithm as [`RateLimiter::acquire`], reporting which gate
    /// produced the wait.
    pub fn admit(&self, key: Option<&str>) -> Admission {
        let key = key.unwrap_or(DEFAULT_KEY);

        let (admission, rolled_over, quota_reached) = {
            let mut state = self.lock();
            let rolled_over = state.roll_over(self.clock.today());
            let admission = self.admit_locked(&mut state, key);
            let quota_reached = admission.is_granted()
                && state.daily_requests == self.config.requests_per_day;
            (admission, rolled_over, quota_reached)
        };

        if let Some(previous) = rolled_over {
            log::info!("New UTC day: daily quota reset ({} calls yesterday)", previous);
        }

        match admission {
            Admission::Granted { wait } if !wait.is_zero() => {
                log::debug!("Admitted {} after {:.3}s wait", display_key(key), wait.as_secs_f64());
            }
            Admission::Granted { .. } => {
                log::trace!("Admitted {} immediately", display_key(key));
            }
            Admission::Backoff { wait } => {
                log::debug!(
                    "Refused {}: backing off for another {:.3}s",
                    display_key(key),
                    wait.as_secs_f64()
                );
            }
            Admission::QuotaExhausted { wait } => {
                log::debug!(
                    "Refused {}: daily quota spent, resets in {:.0}s",
                    display_key(key),
                    wait.as_secs_f64()
                );
            }
        }

        if quota_reached {
            log::warn!(
                "Daily quota of {} calls reached; further calls are refused until UTC midnight",
                self.config.requests_per_day
            );
        }

        admission
    }

    fn admit_locked(&self, state: &mut LimiterState, key: &str) -> Admission {
        let now = self.clock.now();

        if let Some(wait) = state.backoff_remaining(now) {
            return Admission::Backoff { wait };
        }

        if state.daily_requests >= self.config.requests_per_day {
            return Admission::QuotaExhausted {
                wait: until_next_utc_midnight(self.clock.utc_now()),
            };
        }

        let cooldown_wait = state
            .per_key_last_request
            .get(key)
            .map(|last| self.config.cooldown().saturating_sub(now.saturating_duration_since(*last)))
            .unwrap_or(Duration::ZERO);

        // Nothing below can refuse the call, so the pacing check and the
        // token commit happen in one step.
        let token_wait = state.bucket.reserve(1.0);
        let wait = cooldown_wait.max(token_wait);

        state.remember(key, now, self.config.max_tracked_keys);
        state.total_requests += 1;
        state.daily_requests += 1;
        if !wait.is_zero() {
            state.throttled_requests += 1;
        }

        Admission::Granted { wait }
    }

    /// Reports a successful call. Clears all failure state.
    pub fn record_success(&self) {
        let healed = {
            let mut state = self.lock();
            let healed = state.consecutive_failures > 0;
            state.consecutive_failures = 0;
            state.backoff_until = None;
            healed
        };

        if healed {
            log::info!("Provider call succeeded; backoff cleared");
        }
    }

    /// Reports a failed call and starts a new backoff window.
    ///
    /// Provider throttling (`is_rate_limit_error`) and other failures
    /// currently share one backoff curve.
    pub fn record_failure(&self, is_rate_limit_error: bool) {
        let (failures, backoff) = {
            let mut state = self.lock();
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            let backoff = self.backoff.duration(state.consecutive_failures);
            let now = self.clock.now();
            state.backoff_until = Some(deadline(now, backoff));
            (state.consecutive_failures, backoff)
        };

        let kind = if is_rate_limit_error { "rate-limit" } else { "provider" };
        log::warn!(
            "{} failure #{}; backing off for {:.2}s",
            kind,
            failures,
            backoff.as_secs_f64()
        );
        if failures == self.config.max_retries {
            log::warn!("Retry budget of {} failures exhausted", self.config.max_retries);
        }
    }

    /// The backoff a failure would start right now, given the current
    /// failure count. Jittered when the config asks for it.
    pub fn backoff_time(&self) -> Duration {
        let failures = self.lock().consecutive_failures;
        self.backoff.duration(failures)
    }

    /// `false` once `max_retries` consecutive failures have been recorded.
    pub fn should_retry(&self) -> bool {
        self.lock().consecutive_failures < self.config.max_retries
    }

    /// Clears failure state without touching request counters.
    pub fn reset_backoff(&self) {
        {
            let mut state = self.lock();
            state.consecutive_failures = 0;
            state.backoff_until = None;
        }
        log::info!("Backoff reset manually");
    }

    pub fn health(&self) -> Health {
        Health::classify(self.lock().consecutive_failures, self.config.max_retries)
    }

    pub fn metrics(&self) -> Metrics {
        let mut state = self.lock();
        state.roll_over(self.clock.today());
        let now = self.clock.now();

        Metrics {
            total_requests: state.total_requests,
            daily_requests: state.daily_requests,
            throttled_requests: state.throttled_requests,
            daily_remaining: self.config.requests_per_day.saturating_sub(state.daily_requests),
            consecutive_failures: state.consecutive_failures,
            properties_tracked: state.per_key_last_request.len(),
            throttle_rate: Metrics::throttle_rate(state.throttled_requests, state.total_requests),
            health: Health::classify(state.consecutive_failures, self.config.max_retries),
            backoff_remaining: state.backoff_remaining(now),
        }
    }

    // Every critical section leaves the state consistent, so a panic in
    // another thread does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::build(RateLimitConfig::default(), Arc::new(SystemClock))
    }
}

fn deadline(now: Instant, backoff: Duration) -> Instant {
    now.checked_add(backoff)
        .or_else(|| now.checked_add(Duration::from_secs(365 * 24 * 60 * 60)))
        .unwrap_or(now)
}

fn display_key(key: &str) -> &str {
    if key.is_empty() {
        "<default>"
    } else {
        key
    }
}
