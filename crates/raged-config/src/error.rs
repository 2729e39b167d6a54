//! Configuration error types

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A URL-shaped option is not an absolute http(s) URL
    #[error("{field} is not a usable http(s) URL: '{url}'")]
    InvalidUrl { field: String, url: String },

    /// Missing required variable
    #[error("Missing required configuration: {field}")]
    MissingField { field: String },

    /// Numeric knob outside its workable range
    #[error("{field}={value} is out of range (expected {min}-{max})")]
    OutOfRange {
        field: String,
        value: u64,
        min: u64,
        max: u64,
    },

    /// Unknown enumerated value
    #[error("Unknown value '{value}' for {field} (expected one of {expected})")]
    UnknownValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Generic error message
    #[error("Configuration error: {message}")]
    Generic { message: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
