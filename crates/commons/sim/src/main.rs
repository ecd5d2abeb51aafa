//! Commons simulator
//!
//! Runs complete public-goods games against the round engine with
//! simulated participants and prints every participant's final result
//! as JSON.

use clap::Parser;
use commons_runtime::GameEngine;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod driver;
mod error;

use config::SimConfig;
use driver::Simulation;
use error::{SimError, SimResult};

/// Commons simulator CLI
#[derive(Parser)]
#[command(name = "commons-sim")]
#[command(about = "Play simulated public-goods games against the round engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COMMONS_CONFIG")]
    config: Option<String>,

    /// Number of groups (overrides configuration)
    #[arg(short, long)]
    groups: Option<usize>,

    /// RNG seed (overrides configuration)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Log level (overrides configuration)
    #[arg(long, env = "COMMONS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "COMMONS_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> SimResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = SimConfig::load(cli.config.as_deref())
        .map_err(|e| SimError::Config(e.to_string()))?;

    if let Some(groups) = cli.groups {
        config.simulation.groups = groups;
    }
    if cli.seed.is_some() {
        config.simulation.seed = cli.seed;
    }

    // Initialize tracing
    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        players_per_group = config.game.players_per_group,
        num_rounds = config.game.num_rounds,
        groups = config.simulation.groups,
        "Starting commons simulator"
    );

    let engine = GameEngine::new(config.game.clone())?;
    let simulation = Simulation::new(Arc::new(engine), config.simulation.clone());
    tracing::info!(seed = simulation.seed(), "Seed selected");

    let summary = simulation.run().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
