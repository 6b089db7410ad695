//! Concurrent ingestion workers sharing one limiter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinSet;
use tollgate_core::{Metrics, RateLimiter};

use crate::admission::{call_with_admission, RetryPolicy};
use crate::error::IngestResult;

/// One kind of provider call, made once per resource key.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches data for `key` and returns the number of rows ingested.
    async fn fetch(&self, key: &str) -> IngestResult<usize>;
}

/// What happened to one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyOutcome {
    pub key: String,
    pub rows: Option<usize>,
    pub error: Option<String>,
}

impl KeyOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub outcomes: Vec<KeyOutcome>,
    pub metrics: Metrics,
    pub elapsed_secs: f64,
}

impl IngestReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn total_rows(&self) -> usize {
        self.outcomes.iter().filter_map(|o| o.rows).sum()
    }
}

/// A fixed number of workers draining a queue of keys through one limiter.
///
/// Workers pull the next key as soon as they are free, so a key stuck in a
/// long cooldown only occupies its own worker.
#[derive(Debug)]
pub struct IngestPool {
    limiter: Arc<RateLimiter>,
    workers: usize,
    policy: RetryPolicy,
}

impl IngestPool {
    pub fn new(limiter: Arc<RateLimiter>, workers: usize, policy: RetryPolicy) -> Self {
        Self {
            limiter,
            workers: workers.max(1),
            policy,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetches every key once and reports per-key outcomes in the order the
    /// keys were given.
    ///
    /// Every key gets an outcome. Keys a worker never reported on, because it
    /// panicked mid-call or the whole pool died first, are recorded as failed.
    pub async fn run<F>(&self, fetcher: Arc<F>, keys: Vec<String>) -> IngestReport
    where
        F: Fetcher + 'static,
    {
        let started = tokio::time::Instant::now();
        let total = keys.len();
        let queue: Arc<Mutex<VecDeque<(usize, String)>>> =
            Arc::new(Mutex::new(keys.iter().cloned().enumerate().collect()));
        let slots: Arc<Mutex<Vec<Option<KeyOutcome>>>> = Arc::new(Mutex::new(vec![None; total]));

        log::info!("Ingesting {} keys with {} workers", total, self.workers);

        let mut tasks = JoinSet::new();
        for worker in 0..self.workers {
            let queue = Arc::clone(&queue);
            let slots = Arc::clone(&slots);
            let limiter = Arc::clone(&self.limiter);
            let fetcher = Arc::clone(&fetcher);
            let policy = self.policy;

            tasks.spawn(async move {
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some((index, key)) = next else {
                        break;
                    };

                    let fetcher = fetcher.as_ref();
                    let key_ref = key.as_str();
                    let result =
                        call_with_admission(&limiter, key_ref, &policy, || fetcher.fetch(key_ref))
                            .await;

                    let outcome = match result {
                        Ok(rows) => {
                            log::debug!("Worker {} ingested {} rows for {}", worker, rows, key);
                            KeyOutcome {
                                key,
                                rows: Some(rows),
                                error: None,
                            }
                        }
                        Err(e) => {
                            log::warn!("Worker {} failed on {}: {}", worker, key, e);
                            KeyOutcome {
                                key,
                                rows: None,
                                error: Some(e.to_string()),
                            }
                        }
                    };
                    if let Some(slot) = slots
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_mut(index)
                    {
                        *slot = Some(outcome);
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Ingestion worker stopped unexpectedly: {}", e);
            }
        }

        let reported = std::mem::take(&mut *slots.lock().unwrap_or_else(PoisonError::into_inner));
        let outcomes: Vec<KeyOutcome> = reported
            .into_iter()
            .zip(keys)
            .map(|(outcome, key)| {
                outcome.unwrap_or_else(|| KeyOutcome {
                    key,
                    rows: None,
                    error: Some(String::from("worker stopped before reporting an outcome")),
                })
            })
            .collect();

        let report = IngestReport {
            outcomes,
            metrics: self.limiter.metrics(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };

        log::info!(
            "Ingestion finished: {} succeeded, {} failed, {} rows",
            report.succeeded(),
            report.failed(),
            report.total_rows()
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::error::IngestError;
    use tollgate_core::RateLimitConfig;

    #[derive(Debug)]
    struct KeyLength;

    #[async_trait]
    impl Fetcher for KeyLength {
        async fn fetch(&self, key: &str) -> IngestResult<usize> {
            if key.starts_with("missing") {
                return Err(IngestError::NotFound { key: key.to_string() });
            }
            Ok(key.len())
        }
    }

    fn pool(workers: usize) -> IngestPool {
        let config = RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 2,
            cooldown_seconds: 1.0,
            jitter: false,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::with_clock(config, Arc::new(TokioClock::new())).unwrap();
        IngestPool::new(Arc::new(limiter), workers, RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_keep_input_order() {
        let pool = pool(3);
        let keys: Vec<String> = ["a", "bb", "missing-x", "dddd", "eeeee"]
            .iter()
            .map(|k| k.to_string())
            .collect();

        let report = pool.run(Arc::new(KeyLength), keys.clone()).await;

        let reported: Vec<&str> = report.outcomes.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(reported, keys.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.total_rows(), 1 + 2 + 4 + 5);
        assert_eq!(report.metrics.total_requests, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_spreads_calls_over_time() {
        let pool = pool(4);
        let keys: Vec<String> = (0..6).map(|i| format!("property-{i}")).collect();

        let report = pool.run(Arc::new(KeyLength), keys).await;

        // Burst of 2, then one call per second for the other 4.
        assert!(report.elapsed_secs >= 4.0, "finished in {}s", report.elapsed_secs);
        assert_eq!(report.succeeded(), 6);
        assert!(report.metrics.throttled_requests >= 4);
    }

    #[tokio::test]
    async fn test_zero_workers_still_runs() {
        let pool = pool(0);
        let report = pool.run(Arc::new(KeyLength), vec!["k".to_string()]).await;
        assert_eq!(report.succeeded(), 1);
    }

    #[derive(Debug)]
    struct Explodes;

    #[async_trait]
    impl Fetcher for Explodes {
        async fn fetch(&self, key: &str) -> IngestResult<usize> {
            assert!(key != "boom", "fetcher crashed on {key}");
            Ok(key.len())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_worker_keys_are_reported_failed() {
        let pool = pool(1);
        let keys: Vec<String> = ["a", "boom", "c"].iter().map(|k| k.to_string()).collect();

        let report = pool.run(Arc::new(Explodes), keys).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded() + report.failed(), 3);
        assert!(report.outcomes[0].is_success());
        assert_eq!(report.outcomes[1].key, "boom");
        assert!(!report.outcomes[1].is_success());
        // The only worker died, so "c" was never attempted.
        assert_eq!(report.outcomes[2].key, "c");
        assert!(!report.outcomes[2].is_success());
    }
}
