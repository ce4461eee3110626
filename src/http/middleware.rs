//! Per-route rate limit enforcement.
//!
//! Bind a rule to a route with
//! `route_layer(from_fn_with_state(RouteLimit::new(limiter, "auth-login")?, enforce))`.
//! The check runs before the handler, so a throttled request does no work.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, warn};

use super::response::{apply_quota_headers, ApiError};
use crate::error::Result;
use crate::ratelimit::{Identity, RateLimiter};

/// Request extension carrying the authenticated user id.
///
/// Inserted by whatever authenticates the request upstream of [`enforce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Middleware state: a limiter plus the rule a route is bound to.
#[derive(Clone)]
pub struct RouteLimit {
    limiter: Arc<RateLimiter>,
    rule: Arc<str>,
    trust_proxy_headers: bool,
}

impl RouteLimit {
    /// Bind `rule` to a route, failing now if the rule does not exist.
    pub fn new(limiter: Arc<RateLimiter>, rule: &str) -> Result<Self> {
        limiter.rules().get(rule)?;
        Ok(Self {
            limiter,
            rule: Arc::from(rule),
            trust_proxy_headers: false,
        })
    }

    /// Resolve anonymous callers from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Off by default: a client that can set these headers directly could
    /// otherwise claim a fresh address on every request.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }
}

/// Check the request against the route's rule before running the handler.
pub async fn enforce(State(route): State<RouteLimit>, req: Request, next: Next) -> Response {
    let identity = client_identity(&req, route.trust_proxy_headers).to_string();

    match route.limiter.check(&identity, &route.rule) {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(req).await;
            apply_quota_headers(response.headers_mut(), &decision);
            response
        }
        Ok(decision) => {
            warn!(
                identity = %identity,
                rule = %route.rule,
                retry_after_ms = ?decision.retry_after_ms,
                "Rate limit exceeded"
            );
            ApiError::RateLimited(decision).into_response()
        }
        Err(err) => {
            error!(rule = %route.rule, error = %err, "Rate limit check failed");
            ApiError::from(err).into_response()
        }
    }
}

/// Who the request counts against: the authenticated user, else the client IP.
pub fn client_identity<B>(req: &axum::http::Request<B>, trust_proxy_headers: bool) -> Identity {
    let user = req
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0.as_str());
    Identity::resolve(user, client_ip(req, trust_proxy_headers))
}

/// Extract the client IP.
///
/// With `trust_proxy_headers`, proxy headers win over the socket peer;
/// otherwise only the socket peer counts.
pub fn client_ip<B>(req: &axum::http::Request<B>, trust_proxy_headers: bool) -> Option<IpAddr> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    if !trust_proxy_headers {
        return peer;
    }

    let headers = req.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    if forwarded.is_some() {
        return forwarded;
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());
    if real_ip.is_some() {
        return real_ip;
    }

    peer
}
