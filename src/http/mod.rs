//! HTTP integration: route middleware and the decision service.

mod middleware;
mod response;
mod server;
mod service;

pub use middleware::{client_identity, client_ip, enforce, AuthenticatedUser, RouteLimit};
pub use response::{apply_quota_headers, ApiError, KIND_CONFIGURATION, KIND_RATE_LIMITED};
pub use server::{HttpServer, DEFAULT_PING_RULE};
pub use service::{router, CheckRequest, StatsResponse};
