/// Centralized error types for the bar synchronization engine
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    // Source Errors
    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Column '{column}' not found in {path}")]
    MissingColumn { column: String, path: String },

    #[error("Symbol list cannot be empty for single-symbol source: {0}")]
    EmptySymbolList(String),

    #[error("Symbol {symbol} is provided by more than one source ({first} and {second})")]
    DuplicateSymbol {
        symbol: String,
        first: String,
        second: String,
    },

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // Data Errors
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Malformed row for {symbol}: {reason}")]
    MalformedRow { symbol: String, reason: String },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // System Errors
    #[error("Load task failed: {0}")]
    TaskFailed(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, FeedError>;

impl FeedError {
    /// Errors that only cost one symbol its cursor; the merge carries on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FeedError::MalformedRow { .. } | FeedError::InvalidTimestamp(_)
        )
    }

    /// Construction-time structural errors; the feed is not usable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedError::SourceNotFound(_)
                | FeedError::MissingColumn { .. }
                | FeedError::EmptySymbolList(_)
                | FeedError::DuplicateSymbol { .. }
                | FeedError::ConfigError(_)
                | FeedError::InvalidTimezone(_)
        )
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            FeedError::SourceNotFound(_) => "SRC_001",
            FeedError::MissingColumn { .. } => "SRC_002",
            FeedError::EmptySymbolList(_) => "SRC_003",
            FeedError::DuplicateSymbol { .. } => "SRC_004",
            FeedError::CsvError(_) => "SRC_005",
            FeedError::InvalidTimestamp(_) => "DATA_001",
            FeedError::MalformedRow { .. } => "DATA_002",
            FeedError::SerializationError(_) => "DATA_003",
            FeedError::ConfigError(_) => "CFG_001",
            FeedError::InvalidTimezone(_) => "CFG_002",
            FeedError::FileError(_) => "FILE_001",
            FeedError::TaskFailed(_) => "SYS_001",
            FeedError::InternalError(_) => "INT_001",
        }
    }
}
