//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// The file extension is not a supported format
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// An environment override was malformed
    #[error("Invalid value for {name}: {message}")]
    Env {
        /// Variable name
        name: String,
        /// Failure description
        message: String,
    },

    /// The resulting configuration is invalid
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}
