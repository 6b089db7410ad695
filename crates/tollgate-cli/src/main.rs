use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (default: ~/.config/tollgate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Inspect or initialise the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the effective limits and what they mean in practice
    ///
    /// Prints the pacing, burst, cooldown and daily quota the limiter will
    /// enforce with the current configuration, plus the backoff schedule a
    /// run of consecutive provider failures would follow (before jitter).
    Limits,
    /// Drive the ingestion pool against a simulated provider
    ///
    /// Spawns the configured number of workers, each pulling property keys
    /// from a shared queue and calling a fake provider through the limiter.
    /// The provider throttles (HTTP 429) and fails (HTTP 503) at the given
    /// rates so the backoff and healing behaviour can be observed.
    ///
    /// Waits are real: with the default limits, expect roughly two seconds
    /// per call after the initial burst.
    Simulate {
        /// Number of distinct property keys
        #[arg(long, default_value_t = 5)]
        keys: usize,

        /// Calls to make per property key
        #[arg(long, default_value_t = 2)]
        calls_per_key: usize,

        /// Concurrent workers (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Probability that a call fails with a provider error
        #[arg(long, default_value_t = 0.05)]
        failure_rate: f64,

        /// Probability that a call is throttled by the provider
        #[arg(long, default_value_t = 0.1)]
        rate_limit_rate: f64,

        /// Simulated provider latency in milliseconds
        #[arg(long, default_value_t = 150)]
        latency_ms: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, clap::Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Print an example config file
    Example,
    /// Create the config file with defaults if it does not exist
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(tollgate_etl::config::config_file_path);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show_config(&config_path)?,
            ConfigAction::Path => commands::config::show_path(&config_path),
            ConfigAction::Example => commands::config::show_example(),
            ConfigAction::Init => commands::config::init_config(&config_path)?,
        },
        Commands::Limits => {
            commands::show_limits(&config_path)?;
        }
        Commands::Simulate {
            keys,
            calls_per_key,
            workers,
            failure_rate,
            rate_limit_rate,
            latency_ms,
            json,
        } => {
            let options = commands::SimulateOptions {
                keys,
                calls_per_key,
                workers,
                failure_rate,
                rate_limit_rate,
                latency_ms,
                json,
            };
            commands::run_simulate(&config_path, options).await?;
        }
    }

    Ok(())
}
