use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::RateLimiter;
use tollgate_etl::{Config, Fetcher, IngestError, IngestPool, IngestReport, IngestResult};

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub keys: usize,
    pub calls_per_key: usize,
    pub workers: Option<usize>,
    pub failure_rate: f64,
    pub rate_limit_rate: f64,
    pub latency_ms: u64,
    pub json: bool,
}

/// A provider that answers after a fixed latency and misbehaves at random.
#[derive(Debug)]
struct SimulatedProvider {
    latency: Duration,
    failure_rate: f64,
    rate_limit_rate: f64,
}

#[async_trait]
impl Fetcher for SimulatedProvider {
    async fn fetch(&self, key: &str) -> IngestResult<usize> {
        tokio::time::sleep(self.latency).await;

        let roll: f64 = rand::rng().random();
        if roll < self.rate_limit_rate {
            return Err(IngestError::RateLimited { key: key.to_string() });
        }
        if roll < self.rate_limit_rate + self.failure_rate {
            return Err(IngestError::Http {
                key: key.to_string(),
                message: String::from("503 Service Unavailable"),
            });
        }

        let rows = rand::rng().random_range(10..=500);
        Ok(rows)
    }
}

fn probability(name: &str, value: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("--{} must be between 0 and 1, got {}", name, value);
    }
    Ok(value)
}

pub async fn run_simulate(config_path: &Path, options: SimulateOptions) -> Result<()> {
    let config = Config::load_from(config_path)?;
    let limits = config.rate_limits().context("Configured limits are invalid")?;
    let workers = options.workers.unwrap_or(config.workers);

    let provider = SimulatedProvider {
        latency: Duration::from_millis(options.latency_ms),
        failure_rate: probability("failure-rate", options.failure_rate)?,
        rate_limit_rate: probability("rate-limit-rate", options.rate_limit_rate)?,
    };

    let keys: Vec<String> = (0..options.calls_per_key)
        .flat_map(|_| (0..options.keys).map(|i| format!("sc-domain:site-{i}.example")))
        .collect();

    if keys.is_empty() {
        println!("Nothing to simulate.");
        return Ok(());
    }

    let limiter = Arc::new(RateLimiter::new(limits)?);
    let pool = IngestPool::new(limiter, workers, config.retry_policy());

    log::info!(
        "Simulating {} calls over {} properties ({} workers)",
        keys.len(),
        options.keys,
        workers
    );
    let report = pool.run(Arc::new(provider), keys).await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &IngestReport) {
    let metrics = &report.metrics;

    println!("\n📊 Simulation Report\n");
    println!("  Calls:      {} succeeded, {} failed", report.succeeded(), report.failed());
    println!("  Rows:       {}", report.total_rows());
    println!("  Elapsed:    {:.1}s", report.elapsed_secs);

    println!("\n  Limiter:");
    println!("    Admitted:       {}", metrics.total_requests);
    println!(
        "    Throttled:      {} ({:.0}%)",
        metrics.throttled_requests,
        metrics.throttle_rate * 100.0
    );
    println!("    Daily used:     {}", metrics.daily_requests);
    println!("    Daily left:     {}", metrics.daily_remaining);
    println!("    Properties:     {}", metrics.properties_tracked);
    println!("    Health:         {}", metrics.health);
    if let Some(remaining) = metrics.backoff_remaining {
        println!("    Backing off:    {:.1}s left", remaining.as_secs_f64());
    }

    let failures: Vec<_> = report.outcomes.iter().filter(|o| !o.is_success()).collect();
    if !failures.is_empty() {
        println!("\n  Failures:");
        for outcome in failures {
            println!(
                "    {} - {}",
                outcome.key,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
