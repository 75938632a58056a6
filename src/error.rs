//! Error types for the point-in-time backtester

use thiserror::Error;

/// Main error type for the backtester
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Schema error: {table} is missing column '{column}'")]
    SchemaError { table: String, column: String },

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Feature/importance length mismatch: {features} features, {importances} importances")]
    ImportanceMismatch { features: usize, importances: usize },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Worker for '{input}' panicked: {message}")]
    WorkerPanic { input: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl BacktestError {
    /// Shorthand for a missing-column error
    pub fn missing_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        BacktestError::SchemaError {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Whether the affected unit (security, category, quarter, date) can be skipped
    /// and the run continued.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BacktestError::DataUnavailable(_)
                | BacktestError::SchemaError { .. }
                | BacktestError::ModelError(_)
                | BacktestError::ImportanceMismatch { .. }
                | BacktestError::WorkerPanic { .. }
        )
    }
}

/// Result type alias for backtester operations
pub type Result<T> = std::result::Result<T, BacktestError>;
