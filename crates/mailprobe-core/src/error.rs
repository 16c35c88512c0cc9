//! Error types for the core module

use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// The properties file could not be read
    #[error("Could not read configuration file {path}: {reason}")]
    ConfigUnreadable {
        /// Path as given
        path: String,
        /// Underlying IO error
        reason: String,
    },

    /// The properties text could not be parsed
    #[error("Malformed configuration file: {reason}")]
    ConfigMalformed {
        /// Line of the offending entry, when known
        line: Option<usize>,
        /// Parser message
        reason: String,
    },

    /// A required key is absent or blank
    #[error("Missing required configuration key: {0}")]
    ConfigMissing(String),

    /// A key is present but its value is unusable
    #[error("Invalid value for {key}: {reason}")]
    ConfigInvalid {
        /// Offending key
        key: String,
        /// What is wrong with it
        reason: String,
    },
}
