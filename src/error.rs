use thiserror::Error;

/// Errors that can occur while acquiring or preparing chart data
#[derive(Debug, Error)]
pub enum EngineError {
    /// Backend query endpoint reported a failure (`success: false` or non-2xx)
    #[error("Backend error: {0}")]
    Backend(String),

    /// HTTP transport error talking to the backend
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Imported data could not be turned into rows
    #[error("Import error: {0}")]
    Import(String),

    /// Columnar parsing error from polars
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// Configuration error (invalid settings, missing backend URI, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Type alias for Results using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
