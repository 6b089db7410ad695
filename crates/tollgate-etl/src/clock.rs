//! A limiter clock driven by the tokio runtime.

use chrono::{DateTime, Utc};
use tollgate_core::Clock;

/// Reads time from tokio's timer so the limiter and `tokio::time::sleep`
/// agree on how much time has passed.
///
/// Under a paused runtime (`#[tokio::test(start_paused = true)]`) the
/// limiter sees the same virtual time the sleeping workers do.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    utc_origin: DateTime<Utc>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            utc_origin: Utc::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::days(365 * 10_000));
        self.utc_origin + elapsed
    }
}
