//! Error types for the portfolio engine.

use thiserror::Error;

/// Main error type for the portfolio engine.
#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Insufficient history: need {needed} observations, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("Estimation error: {0}")]
    EstimationError(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Calendar error: {0}")]
    CalendarError(String),

    #[error("Simulation error: {0}")]
    SimulationError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Lookahead detected: {0}")]
    LeakageDetected(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for portfolio operations.
pub type Result<T> = std::result::Result<T, PortfolioError>;
