// packages/engine/src/main.rs
//! taskmill, the engine front-end.
//!
//! Starts the engine with an optional JSON config file and runs until
//! ctrl-c, logging a status summary on an interval. Library consumers
//! embed [`taskmill_engine::Engine`] directly instead.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use taskmill_engine::observability::init_tracing;
use taskmill_engine::{Engine, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "taskmill", version, about)]
struct Cli {
    /// Path to a JSON config file. Missing fields take defaults.
    #[arg(long, env = "TASKMILL_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between status log lines.
    #[arg(long, default_value_t = 30)]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    init_tracing(&config.log_level);

    info!(version = taskmill_engine::VERSION, "starting taskmill");
    let engine = Engine::new(config);
    engine.start().await?;

    let mut interval = tokio::time::interval(Duration::from_secs(cli.status_interval.max(1)));
    interval.tick().await; // immediate first tick
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                let status = engine.get_status().await;
                info!(
                    pending = status.pending_count,
                    health = ?engine.get_health().await,
                    "engine status"
                );
            }
        }
    }

    if let Err(e) = engine.shutdown(true).await {
        error!(error = %e, "shutdown failed");
        return Err(e.into());
    }
    info!("engine stopped cleanly");
    Ok(())
}
