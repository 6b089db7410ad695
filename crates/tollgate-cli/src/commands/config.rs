use anyhow::Result;
use std::path::Path;
use tollgate_etl::{config, Config};

/// Show the current effective configuration.
pub fn show_config(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;

    println!("Current Configuration");
    println!("=====================\n");

    println!("Config file: {}", config_path.display());

    let exists = config_path.exists();
    println!("File exists: {}\n", if exists { "yes" } else { "no (using defaults)" });

    let limits = &config.limits;
    println!("Settings:");
    println!("  requests_per_minute: {}", limits.requests_per_minute);
    println!("  requests_per_day: {}", limits.requests_per_day);
    println!("  burst_size: {}", limits.burst_size);
    println!("  cooldown_seconds: {}", limits.cooldown_seconds);
    println!("  max_retries: {}", limits.max_retries);
    println!("  base_backoff: {}", limits.base_backoff);
    println!("  max_backoff: {}", limits.max_backoff);
    println!("  jitter: {}", limits.jitter);
    println!(
        "  max_tracked_keys: {}",
        limits
            .max_tracked_keys
            .map(|n| n.to_string())
            .unwrap_or_else(|| String::from("<unbounded>"))
    );
    println!("  workers: {}", config.workers);
    println!(
        "  max_wait_seconds: {}",
        config
            .max_wait_seconds
            .map(|s| s.to_string())
            .unwrap_or_else(|| String::from("<not set>"))
    );

    if let Err(e) = config.rate_limits() {
        println!("\n⚠ {}", e);
    }

    println!("\nPriority: ENV vars (TOLL_*) > Config file > Defaults");
    println!("`simulate --workers` overrides workers for a single run.");

    Ok(())
}

/// Show the config file path.
pub fn show_path(config_path: &Path) {
    println!("{}", config_path.display());
}

/// Show example configuration.
pub fn show_example() {
    print!("{}", config::example_config());
}

/// Initialize config file with defaults.
pub fn init_config(config_path: &Path) -> Result<()> {
    let created = config::ensure_config_file_at(config_path)?;

    if created {
        println!("✓ Created config file: {}", config_path.display());
        println!("\nEdit this file to configure tollgate.");
    } else {
        println!("Config file already exists: {}", config_path.display());
    }

    Ok(())
}
