//! Typed fetch errors
//!
//! Fetch failures are reported per URL; partial success is the normal mode
//! for a batch.

use serde::Serialize;
use thiserror::Error;

/// The wire-visible reason tag for a failed URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchReason {
    SsrfBlocked,
    Timeout,
    TooLarge,
    RedirectLimit,
    FetchFailed,
}

impl std::fmt::Display for FetchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::SsrfBlocked => "ssrf_blocked",
            Self::Timeout => "timeout",
            Self::TooLarge => "too_large",
            Self::RedirectLimit => "redirect_limit",
            Self::FetchFailed => "fetch_failed",
        };
        write!(f, "{tag}")
    }
}

/// A single URL's failure
#[derive(Debug, Clone, Error)]
#[error("{url}: {reason} ({detail})")]
pub struct FetchError {
    pub url: String,
    pub reason: FetchReason,
    pub detail: String,
}

impl FetchError {
    pub fn new(url: impl Into<String>, reason: FetchReason, detail: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason,
            detail: detail.into(),
        }
    }
}

/// Wire shape of a per-URL failure in `errors[]`
#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub url: String,
    pub reason: FetchReason,
}

impl From<&FetchError> for FetchFailure {
    fn from(err: &FetchError) -> Self {
        Self {
            url: err.url.clone(),
            reason: err.reason,
        }
    }
}
