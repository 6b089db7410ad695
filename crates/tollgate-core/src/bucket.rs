//! Token-bucket pacing primitive.
//!
//! The bucket holds up to `capacity` fractional permits and refills lazily:
//! every read or write first credits the time elapsed since the previous
//! access, so no background timer is needed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// A lock-protected token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    /// Permits promised by `reserve` that refill has not yet covered.
    /// Non-zero only while `tokens` is zero.
    reserved: f64,
    last_refill_at: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64, refill_rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        let mut added = elapsed.as_secs_f64() * refill_rate;

        if self.reserved > 0.0 {
            let repaid = added.min(self.reserved);
            self.reserved -= repaid;
            added -= repaid;
        }

        self.tokens = (self.tokens + added).clamp(0.0, capacity);
        self.last_refill_at = now;
    }

    /// Permits still missing before `n` could be taken, or zero.
    fn deficit(&self, n: f64) -> f64 {
        (n + self.reserved - self.tokens).max(0.0)
    }
}

impl TokenBucket {
    /// Creates a full bucket on the system clock.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `capacity` is negative or
    /// `refill_rate` is not strictly positive.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self> {
        Self::with_clock(capacity, refill_rate, Arc::new(SystemClock))
    }

    /// Creates a full bucket on the given clock.
    ///
    /// # Errors
    /// Same as [`TokenBucket::new`].
    pub fn with_clock(capacity: f64, refill_rate: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if !capacity.is_finite() || capacity < 0.0 {
            return Err(Error::invalid(
                "capacity",
                format!("must be a non-negative number, got {capacity}"),
            ));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(Error::invalid(
                "refill_rate",
                format!("must be a positive number, got {refill_rate}"),
            ));
        }

        Ok(Self::unchecked(capacity, refill_rate, clock))
    }

    /// Builds a bucket from parameters the caller has already validated.
    pub(crate) fn unchecked(capacity: f64, refill_rate: f64, clock: Arc<dyn Clock>) -> Self {
        let state = BucketState {
            tokens: capacity,
            reserved: 0.0,
            last_refill_at: clock.now(),
        };

        Self {
            capacity,
            refill_rate,
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Permits currently available, after crediting elapsed time.
    pub fn tokens(&self) -> f64 {
        self.refilled().tokens
    }

    /// Takes `n` permits if all of them are available.
    ///
    /// Returns `false` and leaves the bucket untouched otherwise; there are
    /// no partial draws.
    pub fn consume(&self, n: f64) -> bool {
        if !n.is_finite() || n < 0.0 {
            return false;
        }

        let mut state = self.refilled();
        if state.deficit(n) > 0.0 {
            return false;
        }
        state.tokens -= n;
        true
    }

    /// How long until `n` permits could be taken. Does not modify the bucket.
    pub fn wait_time(&self, n: f64) -> Duration {
        let state = self.refilled();
        self.duration_for(state.deficit(n))
    }

    /// Takes `n` permits now, borrowing against future refill when the
    /// bucket is short, and returns how long the caller must wait before
    /// the borrowed permits exist.
    ///
    /// Successive reservations queue behind each other, so two callers told
    /// to wait are never handed the same future permit.
    pub fn reserve(&self, n: f64) -> Duration {
        if !n.is_finite() || n <= 0.0 {
            return Duration::ZERO;
        }

        let mut state = self.refilled();
        let deficit = state.deficit(n);
        if deficit <= 0.0 {
            state.tokens -= n;
            return Duration::ZERO;
        }

        state.tokens = 0.0;
        state.reserved = deficit;
        self.duration_for(deficit)
    }

    fn refilled(&self) -> MutexGuard<'_, BucketState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refill(self.clock.now(), self.capacity, self.refill_rate);
        state
    }

    fn duration_for(&self, permits: f64) -> Duration {
        if permits <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(permits / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_bucket(capacity: f64, rate: f64) -> (Arc<ManualClock>, TokenBucket) {
        let clock = Arc::new(ManualClock::default());
        let bucket = TokenBucket::with_clock(capacity, rate, clock.clone()).unwrap();
        (clock, bucket)
    }

    #[test]
    fn test_starts_full() {
        let (_clock, bucket) = manual_bucket(5.0, 1.0);
        assert!((bucket.tokens() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(TokenBucket::new(5.0, 0.0).is_err());
        assert!(TokenBucket::new(5.0, -1.0).is_err());
        assert!(TokenBucket::new(-1.0, 1.0).is_err());
        assert!(TokenBucket::new(f64::INFINITY, 1.0).is_err());
        assert!(TokenBucket::new(0.0, 1.0).is_ok());
    }

    #[test]
    fn test_consume_is_all_or_nothing() {
        let (_clock, bucket) = manual_bucket(3.0, 1.0);
        assert!(bucket.consume(2.0));
        let before = bucket.tokens();

        assert!(!bucket.consume(2.0));
        assert!((bucket.tokens() - before).abs() < 1e-9);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let (clock, bucket) = manual_bucket(4.0, 2.0);
        assert!(bucket.consume(4.0));

        clock.advance_secs(1.0);
        assert!((bucket.tokens() - 2.0).abs() < 1e-9);

        clock.advance_secs(60.0);
        assert!((bucket.tokens() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_fractional_refill() {
        let (clock, bucket) = manual_bucket(1.0, 0.5);
        assert!(bucket.consume(1.0));

        clock.advance_secs(1.0);
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);
        assert!(!bucket.consume(1.0));

        clock.advance_secs(1.0);
        assert!(bucket.consume(1.0));
    }

    #[test]
    fn test_wait_time_does_not_consume() {
        let (_clock, bucket) = manual_bucket(2.0, 1.0);
        assert!(bucket.consume(2.0));

        let wait = bucket.wait_time(1.0);
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-9);
        assert!(bucket.tokens().abs() < 1e-9);
        assert_eq!(bucket.wait_time(1.0), wait);
    }

    #[test]
    fn test_wait_time_zero_when_available() {
        let (_clock, bucket) = manual_bucket(2.0, 1.0);
        assert_eq!(bucket.wait_time(1.0), Duration::ZERO);
        assert_eq!(bucket.wait_time(2.0), Duration::ZERO);
    }

    #[test]
    fn test_reservations_queue_up() {
        let (clock, bucket) = manual_bucket(1.0, 1.0);

        assert_eq!(bucket.reserve(1.0), Duration::ZERO);
        let first = bucket.reserve(1.0);
        let second = bucket.reserve(1.0);
        assert!((first.as_secs_f64() - 1.0).abs() < 1e-9);
        assert!((second.as_secs_f64() - 2.0).abs() < 1e-9);
        assert!(bucket.tokens().abs() < 1e-9);

        // Refill repays the two outstanding reservations before anything
        // becomes available again.
        clock.advance_secs(2.0);
        assert!(bucket.tokens().abs() < 1e-9);
        assert!((bucket.wait_time(1.0).as_secs_f64() - 1.0).abs() < 1e-9);

        clock.advance_secs(1.0);
        assert!((bucket.tokens() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_consume_respects_outstanding_reservations() {
        let (clock, bucket) = manual_bucket(2.0, 1.0);
        assert_eq!(bucket.reserve(2.0), Duration::ZERO);
        assert!(bucket.reserve(1.0) > Duration::ZERO);

        clock.advance_secs(1.5);
        assert!(!bucket.consume(1.0));
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_amounts() {
        let (_clock, bucket) = manual_bucket(2.0, 1.0);
        assert!(!bucket.consume(f64::NAN));
        assert!(!bucket.consume(-1.0));
        assert_eq!(bucket.reserve(0.0), Duration::ZERO);
        assert!((bucket.tokens() - 2.0).abs() < 1e-9);
    }
}
