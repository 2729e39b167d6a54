//! Batched URL fetcher with manual redirect handling
//!
//! Redirects are never delegated to the HTTP client: each hop is re-validated
//! by the SSRF guard, non-http(s) redirect targets and HTTPS downgrade are
//! rejected, and the hop budget is bounded. Bodies are capped twice, by the
//! declared `Content-Length` and by streamed accumulation.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream;
use raged_config::FetchConfig;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{FetchError, FetchReason};
use crate::ssrf::ensure_url_allowed;

/// A successfully fetched URL
#[derive(Debug, Clone)]
pub struct FetchedDoc {
    /// The URL as submitted by the caller
    pub url: String,
    /// The URL the body was finally read from, after redirects
    pub final_url: String,
    /// `Content-Type` header of the final response, if any
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Batch result: partial success is the normal mode
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub fetched: Vec<FetchedDoc>,
    pub errors: Vec<FetchError>,
}

/// SSRF-safe fetcher over a shared HTTP client
pub struct UrlFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    guard: bool,
}

impl UrlFetcher {
    /// Build a fetcher
    ///
    /// # Errors
    ///
    /// Returns the underlying client builder error.
    pub fn new(config: FetchConfig) -> Result<Self, reqwest::Error> {
        // Redirects are handled manually so every hop re-validates.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            config,
            guard: true,
        })
    }

    /// Disable the SSRF guard, for tests against a local mock server
    #[cfg(test)]
    fn without_guard(mut self) -> Self {
        self.guard = false;
        self
    }

    /// Fetch a batch of URLs
    ///
    /// Input URLs are de-duplicated before dispatch; at most
    /// `config.concurrency` fetches run in parallel, each under the total
    /// per-URL timeout.
    pub async fn fetch_batch(&self, urls: &[String]) -> FetchOutcome {
        let mut seen = HashSet::new();
        let unique: Vec<String> = urls
            .iter()
            .filter(|u| seen.insert((*u).clone()))
            .cloned()
            .collect();

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let results = stream::iter(unique.into_iter().map(|url| async move {
            match tokio::time::timeout(timeout, self.fetch_one(&url)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::new(
                    &url,
                    FetchReason::Timeout,
                    format!("no response within {}s", self.config.timeout_seconds),
                )),
            }
        }))
        .buffer_unordered(self.config.concurrency)
        .collect::<Vec<_>>()
        .await;

        let mut outcome = FetchOutcome::default();
        for result in results {
            match result {
                Ok(doc) => outcome.fetched.push(doc),
                Err(err) => outcome.errors.push(err),
            }
        }
        outcome
    }

    /// Fetch one URL, following at most `max_redirects` hops
    async fn fetch_one(&self, original: &str) -> Result<FetchedDoc, FetchError> {
        let mut current = Url::parse(original).map_err(|e| {
            FetchError::new(original, FetchReason::FetchFailed, format!("invalid URL: {e}"))
        })?;

        for hop in 0..=self.config.max_redirects {
            if self.guard {
                // Failures report under the URL the caller submitted, even
                // when a later hop is the one that got blocked.
                ensure_url_allowed(&current)
                    .await
                    .map_err(|e| FetchError::new(original, e.reason, e.detail))?;
            }

            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| FetchError::new(original, FetchReason::FetchFailed, e.to_string()))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        FetchError::new(
                            original,
                            FetchReason::FetchFailed,
                            format!("redirect {status} without usable Location"),
                        )
                    })?;

                // Relative Location resolves against the current URL.
                let next = current.join(location).map_err(|e| {
                    FetchError::new(
                        original,
                        FetchReason::FetchFailed,
                        format!("unresolvable Location '{location}': {e}"),
                    )
                })?;

                match next.scheme() {
                    "http" | "https" => {}
                    scheme => {
                        return Err(FetchError::new(
                            original,
                            FetchReason::SsrfBlocked,
                            format!("redirect to non-http(s) scheme '{scheme}'"),
                        ));
                    }
                }
                if current.scheme() == "https" && next.scheme() == "http" {
                    return Err(FetchError::new(
                        original,
                        FetchReason::SsrfBlocked,
                        "redirect downgrades https to http".to_string(),
                    ));
                }

                debug!(%current, %next, hop, "following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::new(
                    original,
                    FetchReason::FetchFailed,
                    format!("status {status}"),
                ));
            }

            return self.read_body(original, current, response).await;
        }

        Err(FetchError::new(
            original,
            FetchReason::RedirectLimit,
            format!("more than {} redirects", self.config.max_redirects),
        ))
    }

    /// Read the body under the size cap
    async fn read_body(
        &self,
        original: &str,
        final_url: Url,
        response: reqwest::Response,
    ) -> Result<FetchedDoc, FetchError> {
        let cap = self.config.max_body_bytes;

        if let Some(declared) = response.content_length() {
            if usize::try_from(declared).map_or(true, |len| len > cap) {
                return Err(FetchError::new(
                    original,
                    FetchReason::TooLarge,
                    format!("declared length {declared} exceeds cap {cap}"),
                ));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let mut body = BytesMut::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| {
                FetchError::new(original, FetchReason::FetchFailed, e.to_string())
            })?;
            if body.len().saturating_add(chunk.len()) > cap {
                // Dropping the stream cancels the reader.
                return Err(FetchError::new(
                    original,
                    FetchReason::TooLarge,
                    format!("body exceeded cap {cap} while streaming"),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedDoc {
            url: original.to_string(),
            final_url: final_url.to_string(),
            content_type,
            body: body.freeze(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> FetchConfig {
        FetchConfig {
            timeout_seconds: 5,
            max_redirects: 5,
            max_body_bytes: 1024,
            concurrency: 5,
        }
    }

    fn fetcher() -> UrlFetcher {
        UrlFetcher::new(test_config()).unwrap().without_guard()
    }

    #[tokio::test]
    async fn fetches_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("hello world")
                    .insert_header("content-type", "text/plain; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let outcome = fetcher().fetch_batch(&[format!("{}/page", server.uri())]).await;
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.fetched.len(), 1);
        assert_eq!(&outcome.fetched[0].body[..], b"hello world");
        assert_eq!(
            outcome.fetched[0].content_type.as_deref(),
            Some("text/plain; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn follows_relative_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/moved/here"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved/here"))
            .respond_with(ResponseTemplate::new(200).set_body_string("arrived"))
            .mount(&server)
            .await;

        let outcome = fetcher().fetch_batch(&[format!("{}/start", server.uri())]).await;
        assert!(outcome.errors.is_empty());
        assert_eq!(&outcome.fetched[0].body[..], b"arrived");
        assert!(outcome.fetched[0].final_url.ends_with("/moved/here"));
    }

    #[tokio::test]
    async fn enforces_redirect_budget() {
        let server = MockServer::start().await;
        // /loop redirects to itself forever
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
            .mount(&server)
            .await;

        let outcome = fetcher().fetch_batch(&[format!("{}/loop", server.uri())]).await;
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].reason, FetchReason::RedirectLimit);
    }

    #[tokio::test]
    async fn rejects_non_http_redirect_scheme() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ftp"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "ftp://evil.example/x"),
            )
            .mount(&server)
            .await;

        let outcome = fetcher().fetch_batch(&[format!("{}/ftp", server.uri())]).await;
        assert_eq!(outcome.errors[0].reason, FetchReason::SsrfBlocked);
    }

    #[tokio::test]
    async fn rejects_oversized_declared_length() {
        let server = MockServer::start().await;
        let big = "x".repeat(4096);
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string(big))
            .mount(&server)
            .await;

        let outcome = fetcher().fetch_batch(&[format!("{}/big", server.uri())]).await;
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].reason, FetchReason::TooLarge);
    }

    #[tokio::test]
    async fn deduplicates_input_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/once"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/once", server.uri());
        let outcome = fetcher()
            .fetch_batch(&[url.clone(), url.clone(), url])
            .await;
        assert_eq!(outcome.fetched.len(), 1);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn guard_blocks_loopback_targets() {
        let guarded = UrlFetcher::new(test_config()).unwrap();
        let outcome = guarded
            .fetch_batch(&["http://127.0.0.1:9/".to_string()])
            .await;
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].reason, FetchReason::SsrfBlocked);
        assert!(outcome.fetched.is_empty());
    }

    #[tokio::test]
    async fn not_found_is_fetch_failed() {
        let server = MockServer::start().await;
        let outcome = fetcher()
            .fetch_batch(&[format!("{}/absent", server.uri())])
            .await;
        assert_eq!(outcome.errors[0].reason, FetchReason::FetchFailed);
    }
}
