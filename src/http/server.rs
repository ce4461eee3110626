//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// Rule guarding the sample `/v1/ping` route.
pub const DEFAULT_PING_RULE: &str = "api-default";

/// HTTP server for the rate limit decision service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// Rule bound to `/v1/ping`
    ping_rule: String,
    /// Resolve clients from proxy headers
    trust_proxy_headers: bool,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            addr,
            rate_limiter,
            ping_rule: DEFAULT_PING_RULE.to_string(),
            trust_proxy_headers: false,
        }
    }

    /// Guard `/v1/ping` with a different rule.
    pub fn with_ping_rule(mut self, rule: impl Into<String>) -> Self {
        self.ping_rule = rule.into();
        self
    }

    /// Take client addresses from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Only enable this behind a proxy that overwrites those headers.
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = router(self.rate_limiter, &self.ping_rule, self.trust_proxy_headers)?;
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            ping_rule = %self.ping_rule,
            trust_proxy_headers = self.trust_proxy_headers,
            "Starting HTTP server for rate limit service with graceful shutdown"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
