//! Error types for the auto-tuner core.
//!
//! Only setup paths (config loading, opening the serial port) return these.
//! Runtime conditions such as silence, undefined cents or a missing motor
//! acknowledgement are reported as `Option`/`bool`/outcome values instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunerError {
    /// Config file could not be read
    #[error("Failed to read config: {0}")]
    Config(#[source] std::io::Error),

    /// Config file is not valid JSON for `TunerConfig`
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Config parsed but holds values the pipeline cannot work with
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Serial port could not be opened or cloned
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for setup operations
pub type TunerResult<T> = Result<T, TunerError>;
