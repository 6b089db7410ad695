//! Environment overrides for configuration loading.
//!
//! Kept in its own test binary: environment variables are process-wide, and
//! the other integration tests expect a clean `TOLL_*` namespace.

use std::time::Duration;

use tempfile::TempDir;
use tollgate_etl::Config;

const VARS: [(&str, &str); 6] = [
    ("TOLL_REQUESTS_PER_DAY", "1500"),
    ("TOLL_WORKERS", "8"),
    ("TOLL_JITTER", "false"),
    ("TOLL_COOLDOWN_SECONDS", "0.5"),
    ("TOLL_MAX_TRACKED_KEYS", "100"),
    ("TOLL_MAX_WAIT_SECONDS", "30"),
];

/// Test that TOLL_* variables override both the file and the defaults
#[test]
fn test_environment_overrides_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        "requests_per_day = 150\nworkers = 2\njitter = true\nburst_size = 7\n",
    )
    .unwrap();

    for (key, value) in VARS {
        std::env::set_var(key, value);
    }
    let loaded = Config::load_from(&path);
    let missing = Config::load_from(&temp_dir.path().join("absent.toml"));
    for (key, _) in VARS {
        std::env::remove_var(key);
    }

    let config = loaded.expect("environment overrides should load");
    assert_eq!(config.limits.requests_per_day, 1500);
    assert_eq!(config.workers, 8);
    assert!(!config.limits.jitter);
    assert!((config.limits.cooldown_seconds - 0.5).abs() < f64::EPSILON);
    assert_eq!(config.limits.max_tracked_keys, Some(100));
    assert_eq!(config.retry_policy().max_wait, Some(Duration::from_secs(30)));
    // Untouched by the environment, so the file still wins.
    assert_eq!(config.limits.burst_size, 7);
    assert!(config.rate_limits().is_ok());

    let config = missing.expect("environment alone should load");
    assert_eq!(config.limits.requests_per_day, 1500);
    assert_eq!(config.workers, 8);
    assert_eq!(config.limits.burst_size, 5);

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.limits.requests_per_day, 150);
    assert_eq!(config.workers, 2);
}
