//! Configuration validation
//!
//! Small checks shared by the config sections. Each helper carries the name
//! of the environment variable it guards, so a startup failure points at
//! exactly one knob to fix.

use std::ops::RangeInclusive;

use crate::{ConfigError, ConfigResult};

/// Trait for validating a configuration section after loading
pub trait Validate {
    /// Check this section's invariants
    ///
    /// # Errors
    /// Returns the first violated constraint.
    fn validate(&self) -> ConfigResult<()>;
}

/// Reject an empty or whitespace-only value
///
/// # Errors
/// Returns `ConfigError::MissingField` naming the variable.
pub fn require(var: &str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: var.to_string(),
        });
    }
    Ok(())
}

/// Keep a numeric knob inside its workable range, bounds inclusive
///
/// # Errors
/// Returns `ConfigError::OutOfRange` with the accepted bounds.
pub fn bounded(var: &str, value: u64, range: RangeInclusive<u64>) -> ConfigResult<()> {
    if !range.contains(&value) {
        return Err(ConfigError::OutOfRange {
            field: var.to_string(),
            value,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(())
}

/// Accept only absolute http(s) URLs with a host
///
/// The embedding base URL and the blob endpoint are the only URL-shaped
/// options, and both are dialed over plain HTTP(S), so the check mirrors
/// what those clients will accept rather than validating URLs in general.
///
/// # Errors
/// Returns `ConfigError::InvalidUrl` naming the variable.
pub fn http_url(var: &str, value: &str) -> ConfigResult<()> {
    let invalid = || ConfigError::InvalidUrl {
        field: var.to_string(),
        url: value.to_string(),
    };
    let parsed = url::Url::parse(value).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    if parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_rejects_blank_values() {
        assert!(require("RAGED_API_TOKEN", "").is_err());
        assert!(require("RAGED_API_TOKEN", "   ").is_err());
        assert!(require("RAGED_API_TOKEN", "t0ken").is_ok());
    }

    #[test]
    fn bounded_is_inclusive_at_both_ends() {
        assert!(bounded("EMBED_CONCURRENCY", 1, 1..=256).is_ok());
        assert!(bounded("EMBED_CONCURRENCY", 256, 1..=256).is_ok());
        assert!(bounded("EMBED_CONCURRENCY", 0, 1..=256).is_err());
        assert!(bounded("EMBED_CONCURRENCY", 257, 1..=256).is_err());
    }

    #[test]
    fn bounded_error_names_the_variable() {
        let err = bounded("API_PORT", 0, 1..=65535).unwrap_err();
        assert!(err.to_string().contains("API_PORT"));
    }

    #[test]
    fn http_url_accepts_what_the_clients_dial() {
        assert!(http_url("EMBED_BASE_URL", "http://localhost:11434").is_ok());
        assert!(http_url("EMBED_BASE_URL", "https://api.example.com/v1").is_ok());
        assert!(http_url("BLOB_STORE_ENDPOINT", "http://minio:9000").is_ok());
    }

    #[test]
    fn http_url_rejects_other_shapes() {
        assert!(http_url("EMBED_BASE_URL", "postgres://db:5432/raged").is_err());
        assert!(http_url("EMBED_BASE_URL", "localhost:11434").is_err());
        assert!(http_url("EMBED_BASE_URL", "http://").is_err());
        assert!(http_url("EMBED_BASE_URL", "").is_err());
    }
}
