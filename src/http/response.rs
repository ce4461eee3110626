//! HTTP error payloads and rate limit headers.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::FloodgateError;
use crate::ratelimit::Decision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Machine-readable error kinds.
pub const KIND_RATE_LIMITED: &str = "RATE_LIMITED";
pub const KIND_CONFIGURATION: &str = "CONFIGURATION_ERROR";
pub const KIND_BAD_REQUEST: &str = "BAD_REQUEST";
pub const KIND_INTERNAL: &str = "INTERNAL_ERROR";

/// Errors the HTTP layer turns into responses.
#[derive(Debug)]
pub enum ApiError {
    /// The caller is over quota
    RateLimited(Decision),
    /// A rule or other configuration is wrong; never the caller's fault
    Configuration(String),
    /// The request itself is malformed
    BadRequest(String),
    /// Any other server-side failure
    Internal(String),
}

impl From<FloodgateError> for ApiError {
    fn from(err: FloodgateError) -> Self {
        if err.is_configuration() {
            ApiError::Configuration(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, decision) = match self {
            ApiError::RateLimited(decision) => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorDetail {
                    kind: KIND_RATE_LIMITED,
                    message: "Too many requests, retry after the indicated delay".to_string(),
                    retry_after_ms: decision.retry_after_ms,
                },
                Some(decision),
            ),
            ApiError::Configuration(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    kind: KIND_CONFIGURATION,
                    message,
                    retry_after_ms: None,
                },
                None,
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    kind: KIND_BAD_REQUEST,
                    message,
                    retry_after_ms: None,
                },
                None,
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    kind: KIND_INTERNAL,
                    message,
                    retry_after_ms: None,
                },
                None,
            ),
        };

        let mut response = (status, Json(ErrorBody { error: detail })).into_response();
        if let Some(decision) = decision {
            apply_quota_headers(response.headers_mut(), &decision);
        }
        response
    }
}

/// Attach quota headers, and `Retry-After` for denials.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.div_ceil(1000)),
    );
    if let Some(secs) = decision.retry_after_secs() {
        headers.insert(RETRY_AFTER, HeaderValue::from(secs));
    }
}
