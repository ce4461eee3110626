//! Rate limit decision service routes.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::middleware::{enforce, RouteLimit};
use super::response::ApiError;
use crate::error::Result;
use crate::ratelimit::{Decision, RateLimitRule, RateLimiter};

/// Body of `POST /v1/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Rendered client identity, e.g. `user:42` or `ip:10.0.0.1`
    pub identity: String,
    /// Rule to check against
    pub rule: String,
}

/// Body of `GET /v1/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub tracked_keys: usize,
    pub rules: usize,
}

/// Build the service router.
///
/// `ping_rule` guards `GET /v1/ping`; binding fails here if it is unknown.
pub fn router(
    limiter: Arc<RateLimiter>,
    ping_rule: &str,
    trust_proxy_headers: bool,
) -> Result<Router> {
    let ping_limit =
        RouteLimit::new(limiter.clone(), ping_rule)?.trust_proxy_headers(trust_proxy_headers);

    let protected = Router::new()
        .route("/v1/ping", get(ping))
        .route_layer(axum::middleware::from_fn_with_state(ping_limit, enforce));

    Ok(Router::new()
        .route("/healthz", get(health))
        .route("/v1/check", post(check))
        .route("/v1/rules", get(rules))
        .route("/v1/stats", get(stats))
        .with_state(limiter)
        .merge(protected))
}

#[instrument(skip_all, fields(identity = %request.identity, rule = %request.rule))]
async fn check(
    State(limiter): State<Arc<RateLimiter>>,
    Json(request): Json<CheckRequest>,
) -> std::result::Result<Json<Decision>, ApiError> {
    if request.identity.trim().is_empty() {
        return Err(ApiError::BadRequest("identity is required".to_string()));
    }

    let decision = limiter.check(&request.identity, &request.rule)?;
    debug!(allowed = decision.allowed, remaining = decision.remaining, "Rate limit decision made");

    if decision.allowed {
        Ok(Json(decision))
    } else {
        Err(ApiError::RateLimited(decision))
    }
}

async fn rules(State(limiter): State<Arc<RateLimiter>>) -> Json<Vec<RateLimitRule>> {
    Json(limiter.rules().sorted().into_iter().cloned().collect())
}

async fn stats(State(limiter): State<Arc<RateLimiter>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        tracked_keys: limiter.tracked_keys(),
        rules: limiter.rules().len(),
    })
}

async fn health() -> &'static str {
    "ok"
}

async fn ping() -> &'static str {
    "pong"
}
