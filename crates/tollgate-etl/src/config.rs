use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tollgate_core::de::{from_str_or_value, option_from_str_or_value};
use tollgate_core::RateLimitConfig;

use crate::admission::RetryPolicy;

/// Configuration for tollgate ingestion workers.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. Environment variables (TOLL_* prefix, highest priority)
/// 2. Config file (~/.config/tollgate/config.toml)
/// 3. Built-in defaults (lowest priority)
///
/// `tollgate simulate --workers` can still override `workers` for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Limits imposed by the provider.
    ///
    /// Every field can be set at the top level of the config file or via
    /// ENV, e.g. TOLL_REQUESTS_PER_DAY=1500.
    #[serde(flatten)]
    pub limits: RateLimitConfig,

    /// Number of concurrent ingestion workers.
    ///
    /// Can be set via:
    /// - CLI: tollgate simulate --workers 8
    /// - ENV: TOLL_WORKERS
    /// - Config: workers = 8
    #[serde(deserialize_with = "from_str_or_value")]
    pub workers: usize,

    /// Give up on a call instead of sleeping longer than this.
    ///
    /// Unset means wait as long as the limiter says, including until the
    /// daily quota resets.
    #[serde(deserialize_with = "option_from_str_or_value")]
    pub max_wait_seconds: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: RateLimitConfig::default(),
            workers: 4,
            max_wait_seconds: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/tollgate/config.toml
    /// Reads environment variables with TOLL_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from an explicit file path plus the environment.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("toll");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;

        log::debug!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    /// The validated limiter configuration.
    ///
    /// # Errors
    /// Returns the first limit that fails validation.
    pub fn rate_limits(&self) -> tollgate_core::Result<RateLimitConfig> {
        self.limits.validate()?;
        Ok(self.limits.clone())
    }

    /// Retry settings for [`crate::call_with_admission`].
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_wait: self
                .max_wait_seconds
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)),
        }
    }
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/tollgate/config.toml
/// - macOS: ~/Library/Application Support/tollgate/config.toml
/// - Windows: %APPDATA%\tollgate\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tollgate")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Tollgate Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. Environment variables (TOLL_* prefix, e.g. TOLL_REQUESTS_PER_DAY=1500)
# 2. This config file
# 3. Built-in defaults (lowest priority)

# Pacing target agreed with the provider. The token bucket refills at
# requests_per_minute / 60 calls per second.
requests_per_minute = 30

# Hard ceiling on calls per UTC day. Once reached, calls are refused until
# UTC midnight.
requests_per_day = 2000

# Largest burst admitted without waiting.
burst_size = 5

# Minimum seconds between two calls for the same property.
cooldown_seconds = 2.0

# Consecutive provider failures before workers give up.
max_retries = 5

# Backoff after the first failure, doubling per failure up to max_backoff.
base_backoff = 2.0
max_backoff = 300.0

# Randomise each backoff by 0.5x-1.5x so workers do not retry in lockstep.
jitter = true

# Forget the least recently used properties beyond this many.
#max_tracked_keys = 500

# Concurrent ingestion workers.
#
# Can also be set via:
# - CLI: tollgate simulate --workers 8
# - Environment: TOLL_WORKERS=8
workers = 4

# Abandon a call rather than sleep longer than this many seconds.
#max_wait_seconds = 600.0
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    ensure_config_file_at(&config_file_path())
}

/// Like [`ensure_config_file`], for an explicit path.
pub fn ensure_config_file_at(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(config_path, example_config()).context("Failed to write config file")?;

    log::info!("Created config file {}", config_path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workers, 4);
        assert!(config.max_wait_seconds.is_none());
        assert_eq!(config.limits, RateLimitConfig::default());
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let parsed: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("requests_per_day = 50\nworkers = 2\n").unwrap();
        assert_eq!(parsed.limits.requests_per_day, 50);
        assert_eq!(parsed.limits.burst_size, 5);
        assert_eq!(parsed.workers, 2);
    }

    #[test]
    fn test_rate_limits_validates() {
        let mut config = Config::default();
        assert!(config.rate_limits().is_ok());

        config.limits.burst_size = 0;
        assert!(config.rate_limits().is_err());
    }

    #[test]
    fn test_retry_policy_ignores_nonsense_wait() {
        let mut config = Config::default();
        assert!(config.retry_policy().max_wait.is_none());

        config.max_wait_seconds = Some(30.0);
        assert_eq!(config.retry_policy().max_wait, Some(Duration::from_secs(30)));

        config.max_wait_seconds = Some(-1.0);
        assert!(config.retry_policy().max_wait.is_none());

        config.max_wait_seconds = Some(1e20);
        assert_eq!(config.retry_policy().max_wait, Some(Duration::MAX));
    }

    #[test]
    fn test_config_load() {
        // Should not fail even if config file doesn't exist
        let result = Config::load();
        assert!(result.is_ok());
    }
}
