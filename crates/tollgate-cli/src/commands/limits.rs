use anyhow::{Context, Result};
use std::path::Path;
use tollgate_core::BackoffPolicy;
use tollgate_etl::Config;

pub fn show_limits(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;
    let limits = config.rate_limits().context("Configured limits are invalid")?;

    let spacing = 1.0 / limits.refill_rate();
    let hours_to_spend_quota = limits.requests_per_day as f64 / f64::from(limits.requests_per_minute) / 60.0;

    println!("\n🚦 Effective Limits\n");
    println!("  Pacing:        {} calls/min (one every {:.2}s)", limits.requests_per_minute, spacing);
    println!("  Burst:         {} calls without waiting", limits.burst_size);
    println!("  Cooldown:      {:.2}s between calls to the same property", limits.cooldown_seconds);
    println!("  Daily quota:   {} calls per UTC day", limits.requests_per_day);
    println!("                 ({:.1}h of calls at full pace)", hours_to_spend_quota);

    let policy = BackoffPolicy::new(limits.base_backoff, limits.max_backoff, false);
    println!("\n  Backoff after consecutive failures (before jitter):");
    for failures in 1..=limits.max_retries {
        println!("    #{:<3} {:>8.1}s", failures, policy.raw_secs(failures));
    }
    if limits.jitter {
        println!("  Jitter scales each backoff by 0.5x-1.5x.");
    }
    println!("  Workers give up after {} consecutive failures.", limits.max_retries);

    Ok(())
}
