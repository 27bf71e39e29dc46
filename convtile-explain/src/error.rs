//! Error types for convtile-explain

use thiserror::Error;

/// Errors that stop the CLI before a report can be written
#[derive(Error, Debug)]
pub enum ExplainError {
    /// Command-line shape argument is malformed
    #[error("Invalid shape `{input}`: {reason}")]
    InvalidShape {
        /// Text as given
        input: String,
        /// What is wrong with it
        reason: String,
    },

    /// Hardware table could not be loaded
    #[error("Hardware table: {0}")]
    Config(#[from] convtile::ConfigError),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convtile-explain operations
pub type Result<T> = std::result::Result<T, ExplainError>;
