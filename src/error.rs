use chrono::NaiveDate;
use indicatif::style::TemplateError;
use thiserror::Error;

pub type QtradeResult<T> = Result<T, QtradeError>;

#[derive(Debug, Error)]
pub enum QtradeError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors occurring within agent logic or agent configuration.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("No legal action to choose from at {0}")]
    EmptyActionSet(String),

    #[error("Invalid training batch: {0}")]
    InvalidBatch(String),
}

/// Errors related to price data availability and lookups.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("No price data for '{symbol}' on {date}")]
    NotFound { date: NaiveDate, symbol: String },

    #[error(
        "Insufficient history before {date}: requested {requested} days, only {available} available"
    )]
    InsufficientHistory {
        date: NaiveDate,
        requested: usize,
        available: usize,
    },

    #[error("Unknown symbol: '{0}'")]
    UnknownSymbol(String),

    #[error("Price series for '{symbol}' has {got} points but {expected} dates")]
    MisalignedSeries {
        symbol: String,
        expected: usize,
        got: usize,
    },

    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid data source configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by value-function backends.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Batch has {records} records but {targets} targets")]
    TargetMismatch { records: usize, targets: usize },

    #[error("Model produced a non-finite value: {0}")]
    NonFinite(String),
}

/// Errors related to session and training lifecycle and configuration.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Progress bar error")]
    ProgressBar(#[from] TemplateError),
}

/// Errors related to file I/O and serialization.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed")]
    Json(#[from] serde_json::Error),
}

/// Errors related to internal invariants.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Index out of bounds: {0}")]
    IndexOutOfBounds(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}
