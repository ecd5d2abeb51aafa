//! Error types for commons-sim

use commons_types::EngineError;
use thiserror::Error;

/// Simulation-level errors
#[derive(Debug, Error)]
pub enum SimError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine rejected an operation the driver cannot recover from
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// A participant task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;
