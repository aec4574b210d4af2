//! Error types for the online_forecast crate

use interval_math::MathError;
use thiserror::Error;

/// Errors raised by the forecasting pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Error from the datastore
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A model could not be loaded from its blob or path
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// A loaded model failed to produce a usable forecast
    #[error("Prediction error: {0}")]
    Prediction(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Not enough data to do the requested work
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Model blob decoding failure
    #[error("Decode error: {0}")]
    Decode(#[from] bincode::Error),

    /// CSV replay input could not be read
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from interval or accuracy calculations
    #[error("Math error: {0}")]
    Math(#[from] MathError),
}

impl PipelineError {
    /// Errors that indicate the datastore rejected or lost the statement
    pub fn is_database(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, PipelineError>;
