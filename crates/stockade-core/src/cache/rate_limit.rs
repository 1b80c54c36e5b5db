//! Distributed fixed-window rate limiting
//!
//! Counters live in Redis so limits hold across application instances. Keys
//! embed the window start; INCR + first-hit EXPIRE keeps the bucket honest
//! without a Lua script.

use std::time::{SystemTime, UNIX_EPOCH};

use super::{CacheNamespace, CacheResult, RedisPool};
use crate::config::RateLimitRule;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Seconds until the current window resets
    pub retry_after_secs: u64,
}

pub struct RedisRateLimiter {
    pool: RedisPool,
}

impl RedisRateLimiter {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Count one hit for `identifier` under `rule`
    pub async fn check(&self, identifier: &str, rule: RateLimitRule) -> CacheResult<RateLimitDecision> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let key = window_key(self.pool.key_prefix(), identifier, rule.window_secs, now);

        let mut conn = self.pool.get().await?;
        let current = conn.incr(&key).await? as u64;

        if current == 1 {
            conn.expire(&key, rule.window_secs).await?;
        }

        let window_start = now - (now % rule.window_secs);
        let retry_after_secs = window_start + rule.window_secs - now;

        Ok(RateLimitDecision {
            allowed: current <= rule.max_requests,
            remaining: rule.max_requests.saturating_sub(current),
            retry_after_secs,
        })
    }
}

fn window_key(prefix: &str, identifier: &str, window_secs: u64, now: u64) -> String {
    let window_start = now - (now % window_secs);
    format!(
        "{}:{}:{}:{}",
        prefix,
        CacheNamespace::RateLimit.prefix(),
        identifier,
        window_start
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_key_is_stable_within_window() {
        let a = window_key("stockade", "user:1:create", 60, 1_000_000);
        let b = window_key("stockade", "user:1:create", 60, 1_000_059);
        assert_eq!(a, b);

        let c = window_key("stockade", "user:1:create", 60, 1_000_060);
        assert_ne!(a, c);
    }

    #[test]
    fn test_window_key_separates_identifiers() {
        let a = window_key("stockade", "user:1:create", 60, 1_000_000);
        let b = window_key("stockade", "user:2:create", 60, 1_000_000);
        assert_ne!(a, b);
    }
}
