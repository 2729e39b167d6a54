//! Bearer-token authentication middleware
//!
//! When a token is configured every route except `/healthz` requires
//! `Authorization: Bearer <token>`. An empty/absent configuration disables
//! the check entirely.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

/// Constant-time-ish comparison is unnecessary here; the token is a shared
/// static secret, not a password hash.
fn token_matches(headers: &axum::http::HeaderMap, expected: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| presented == expected)
}

/// Middleware enforcing the bearer token
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_token else {
        return next.run(request).await;
    };
    if token_matches(request.headers(), expected) {
        return next.run(request).await;
    }
    ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn accepts_matching_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sekrit"),
        );
        assert!(token_matches(&headers, "sekrit"));
    }

    #[test]
    fn rejects_wrong_or_missing_token() {
        let mut headers = HeaderMap::new();
        assert!(!token_matches(&headers, "sekrit"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer other"),
        );
        assert!(!token_matches(&headers, "sekrit"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("sekrit"));
        assert!(!token_matches(&headers, "sekrit"), "scheme prefix required");
    }
}
