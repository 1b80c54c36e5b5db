//! Idempotency markers for at-least-once consumers
//!
//! The broker may redeliver any unacked message. Consumers key their side
//! effect on `(reservation id, terminal status)`: the first claim wins, a
//! redelivery finds the marker and does nothing.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache::{CacheNamespace, RedisPool};
use crate::{Error, Result};

/// Marker TTL; long enough to outlive any redelivery storm
const MARKER_TTL_SECS: u64 = 86_400;

#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Atomically claim `key`; true when this caller is first
    async fn claim(&self, key: &str) -> Result<bool>;
}

/// Redis-backed guard shared across instances
pub struct RedisIdempotencyGuard {
    pool: RedisPool,
}

impl RedisIdempotencyGuard {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyGuard for RedisIdempotencyGuard {
    async fn claim(&self, key: &str) -> Result<bool> {
        let full_key = format!(
            "{}:{}",
            self.pool.key_prefix(),
            CacheNamespace::EmailSent.key(key)
        );

        let mut conn = self.pool.get().await?;
        let claimed = conn.set_nx_ex(&full_key, MARKER_TTL_SECS, b"1").await?;
        Ok(claimed)
    }
}

/// In-process guard for single-instance deployments and tests
#[derive(Default)]
pub struct MemoryIdempotencyGuard {
    seen: Mutex<HashSet<String>>,
}

impl MemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryIdempotencyGuard {
    async fn claim(&self, key: &str) -> Result<bool> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| Error::Other("idempotency guard poisoned".to_string()))?;
        Ok(seen.insert(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_guard_first_claim_wins() {
        let guard = MemoryIdempotencyGuard::new();

        assert!(guard.claim("r1:CONFIRMED").await.unwrap());
        // Redelivery of the same transition is rejected
        assert!(!guard.claim("r1:CONFIRMED").await.unwrap());
        // A different transition for the same reservation is distinct
        assert!(guard.claim("r1:EXPIRED").await.unwrap());
    }
}
