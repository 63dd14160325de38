// =============================================================================
// Bearer Token Authentication — Axum extractor
// =============================================================================
//
// Extracts and validates a Bearer token from the `Authorization` header
// against the `JOURNAL_API_TOKEN` environment variable. Comparison is
// performed in constant time.
//
// Usage as an Axum extractor:
//
//   async fn handler(_auth: AuthBearer, ...) { ... }
//
// If the token is missing or invalid, the extractor short-circuits the request
// with a 403 Forbidden response before the handler body executes.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

const TOKEN_ENV: &str = "JOURNAL_API_TOKEN";

/// Compare two byte slices in constant time for equal lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn expected_token() -> String {
    std::env::var(TOKEN_ENV).unwrap_or_default()
}

// =============================================================================
// Extractor
// =============================================================================

/// Proof that the request carried a valid `Authorization: Bearer <token>`.
pub struct AuthBearer;

/// Rejection type returned when authentication fails.
#[derive(Debug)]
pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

/// Check an `Authorization` header value against `expected`.
fn check_bearer(header: Option<&str>, expected: &str) -> Result<(), AuthRejection> {
    if expected.is_empty() {
        warn!("{TOKEN_ENV} is not set, rejecting authenticated request");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Server authentication not configured",
        });
    }

    let token = match header.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => {
            warn!("Missing or malformed Authorization header");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Missing or invalid authorization token",
            });
        }
    };

    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        warn!("Invalid API token presented");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Invalid authorization token",
        });
    }

    Ok(())
}

impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Read per request so the token can rotate without a restart.
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        check_bearer(header, &expected_token()).map(|()| AuthBearer)
    }
}

/// Validate a token passed outside the header (WebSocket `?token=`).
pub fn validate_token(token: &str) -> bool {
    let expected = expected_token();
    !expected.is_empty() && constant_time_eq(token.as_bytes(), expected.as_bytes())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer_string"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }

    #[test]
    fn bearer_accepted() {
        assert!(check_bearer(Some("Bearer s3cret"), "s3cret").is_ok());
    }

    #[test]
    fn bearer_rejections() {
        let missing = check_bearer(None, "s3cret").unwrap_err();
        assert_eq!(missing.status, StatusCode::FORBIDDEN);

        let wrong_scheme = check_bearer(Some("Basic s3cret"), "s3cret").unwrap_err();
        assert_eq!(wrong_scheme.message, "Missing or invalid authorization token");

        let wrong = check_bearer(Some("Bearer nope"), "s3cret").unwrap_err();
        assert_eq!(wrong.message, "Invalid authorization token");

        let unconfigured = check_bearer(Some("Bearer "), "").unwrap_err();
        assert_eq!(unconfigured.message, "Server authentication not configured");
    }
}
