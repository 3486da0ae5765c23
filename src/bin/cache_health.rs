//! # Cache Health CLI
//!
//! Loads the hybrid cache configuration from the environment, connects both
//! backends and reports their health.
//!
//! ```bash
//! # One-shot probe; exit status 1 when no backend is reachable
//! REDIS_LOCAL_URL=redis://127.0.0.1:6379 cache-health check
//!
//! # Print health every 5s until Ctrl+C / SIGTERM, then close gracefully
//! cache-health watch --interval-secs 5
//!
//! # Show the effective configuration with credentials masked
//! cache-health config
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use hybrid_cache::cache::HybridManager;
use hybrid_cache::config::ConfigManager;
use hybrid_cache::{logging, shutdown};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "cache-health")]
#[command(about = "Inspect the health of the hybrid cache backends")]
#[command(version)]
struct Cli {
    /// TOML configuration file layered under REDIS_* environment variables
    #[arg(short, long, env = "CACHE_CONFIG_PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, probe both backends once and print the snapshot as JSON
    Check,
    /// Keep probing on an interval until a shutdown signal arrives
    Watch {
        /// Seconds between probes
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
    },
    /// Print the effective configuration with credentials masked
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    logging::init_structured_logging();
    let cli = Cli::parse();

    let config = ConfigManager::load_from_sources(cli.config.as_deref(), None)
        .context("failed to load cache configuration")?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config.debug_config())?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let manager = HybridManager::from_config(config.config_arc())?;
            manager.ensure_ready().await;
            let health = manager.check_health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);

            shutdown::close_cache(&manager, config.config().shutdown_grace_period()).await;
            Ok(if health.any_connected() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Watch { interval_secs } => {
            let manager = HybridManager::from_config(config.config_arc())?;
            manager.ensure_ready().await;
            info!(interval_secs, "Watching cache health, press Ctrl+C to stop");

            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            let signal = shutdown::shutdown_signal();
            tokio::pin!(signal);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let health = manager.check_health().await;
                        println!("{}", serde_json::to_string(&health)?);
                    }
                    _ = &mut signal => break,
                }
            }

            info!("Shutdown signal received, closing cache connections");
            shutdown::close_cache(&manager, config.config().shutdown_grace_period()).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}
