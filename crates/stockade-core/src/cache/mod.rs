//! Redis caching layer
//!
//! TTL-keyed KV used by the authentication collaborator: cached user
//! principals, token blacklist entries, and fixed-window rate-limit counters.
//! Every operation is bounded by a short timeout so the request path never
//! blocks on a sick Redis.

pub mod connection;
pub mod principal;
pub mod rate_limit;
pub mod token;

pub use connection::{RedisConnection, RedisPool};
pub use principal::{CachedPrincipal, PrincipalCache};
pub use rate_limit::{RateLimitDecision, RedisRateLimiter};
pub use token::TokenBlacklist;

/// Cache result type alias
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout waiting for Redis")]
    Timeout,
}

impl From<CacheError> for crate::Error {
    fn from(err: CacheError) -> Self {
        crate::Error::Cache(err.to_string())
    }
}

/// Cache namespaces keep key families from colliding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    /// Cached user principals
    Principal,

    /// Token blacklist
    TokenBlacklist,

    /// Rate limiting counters
    RateLimit,

    /// Email idempotency markers
    EmailSent,
}

impl CacheNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheNamespace::Principal => "principal",
            CacheNamespace::TokenBlacklist => "token:blacklist",
            CacheNamespace::RateLimit => "rate:limit",
            CacheNamespace::EmailSent => "email:sent",
        }
    }

    /// Create a prefixed key
    pub fn key(&self, key: impl AsRef<str>) -> String {
        format!("{}:{}", self.prefix(), key.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_keys() {
        assert_eq!(
            CacheNamespace::Principal.key("user:123"),
            "principal:user:123"
        );
        assert_eq!(
            CacheNamespace::TokenBlacklist.key("jti-1"),
            "token:blacklist:jti-1"
        );
        assert_eq!(
            CacheNamespace::EmailSent.key("r1:CONFIRMED"),
            "email:sent:r1:CONFIRMED"
        );
    }
}
