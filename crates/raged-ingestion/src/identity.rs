//! Identity keys
//!
//! The identity key deduplicates re-ingests within a collection. For URLs it
//! is the origin plus path, discarding query and fragment; everything else is
//! the source verbatim.

use url::Url;

/// Canonicalise a source into its identity key
pub fn identity_key(source: &str) -> String {
    let Ok(parsed) = Url::parse(source) else {
        return source.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return source.to_string();
    }
    let origin = parsed.origin().ascii_serialization();
    format!("{}{}", origin, parsed.path())
}
