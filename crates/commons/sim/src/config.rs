//! Configuration for commons-sim

use commons_types::GameConfig;
use serde::{Deserialize, Serialize};

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SimConfig {
    /// Game rules
    #[serde(default)]
    pub game: GameConfig,

    /// Simulated participant behaviour
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Simulated participant behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Groups to create
    #[serde(default = "default_groups")]
    pub groups: usize,

    /// RNG seed; random when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Chance of missing a phase deadline, in basis points
    #[serde(default = "default_timeout_bps")]
    pub timeout_bps: u32,

    /// Chance of idling out on a page between rounds, in basis points
    #[serde(default = "default_inactivity_bps")]
    pub inactivity_bps: u32,

    /// Chance of punishing a given group member, in basis points
    #[serde(default = "default_punish_bps")]
    pub punish_bps: u32,

    /// Upper bound of simulated think time per decision
    #[serde(default = "default_max_think_ms")]
    pub max_think_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            groups: default_groups(),
            seed: None,
            timeout_bps: default_timeout_bps(),
            inactivity_bps: default_inactivity_bps(),
            punish_bps: default_punish_bps(),
            max_think_ms: default_max_think_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_groups() -> usize {
    2
}

fn default_timeout_bps() -> u32 {
    300
}

fn default_inactivity_bps() -> u32 {
    100
}

fn default_punish_bps() -> u32 {
    2_500
}

fn default_max_think_ms() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SimConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `COMMONS_` environment variables (`__` separates nested keys)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&SimConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // e.g. COMMONS_GAME__NUM_ROUNDS=10
        builder = builder.add_source(
            config::Environment::with_prefix("COMMONS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
