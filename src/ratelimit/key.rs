//! Client identity and window store key derivation.

use std::fmt;
use std::net::IpAddr;

/// Who a request is counted against.
///
/// Authenticated callers are tracked by user id; anonymous callers fall back
/// to their source address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// An authenticated user id
    User(String),
    /// Source IP address of an unauthenticated caller
    Ip(IpAddr),
    /// Neither a user nor a source address could be determined
    Unknown,
}

impl Identity {
    /// Prefer the authenticated user, fall back to the source address.
    pub fn resolve(user_id: Option<&str>, ip: Option<IpAddr>) -> Self {
        match (user_id.map(str::trim).filter(|id| !id.is_empty()), ip) {
            (Some(id), _) => Identity::User(id.to_string()),
            (None, Some(ip)) => Identity::Ip(ip),
            (None, None) => Identity::Unknown,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user:{}", id),
            Identity::Ip(ip) => write!(f, "ip:{}", ip),
            Identity::Unknown => write!(f, "unknown"),
        }
    }
}

/// A key that uniquely identifies one counter: a rule applied to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The rule this counter is bound to
    pub rule: String,
    /// The rendered client identity
    pub identity: String,
}

impl RateLimitKey {
    pub fn new(rule: &str, identity: &str) -> Self {
        Self {
            rule: rule.to_string(),
            identity: identity.to_string(),
        }
    }

    /// The store key, `{rule}:{identity}`.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.rule, self.identity)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
