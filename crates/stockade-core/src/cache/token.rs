//! Token blacklist for revoked credentials
//!
//! Entries live exactly as long as the token would have: the TTL is the
//! remaining token lifetime, so the blacklist cleans itself.

use chrono::{DateTime, Utc};
use tracing::info;

use super::{CacheNamespace, CacheResult, RedisPool};

pub struct TokenBlacklist {
    pool: RedisPool,
}

impl TokenBlacklist {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn key(&self, jti: &str) -> String {
        format!(
            "{}:{}",
            self.pool.key_prefix(),
            CacheNamespace::TokenBlacklist.key(jti)
        )
    }

    /// Revoke a token until its natural expiry
    ///
    /// Already-expired tokens are ignored; they cannot authenticate anyway.
    pub async fn revoke(
        &self,
        jti: &str,
        reason: &str,
        token_expires_at: DateTime<Utc>,
    ) -> CacheResult<()> {
        let remaining = token_expires_at.timestamp() - Utc::now().timestamp();
        if remaining <= 0 {
            return Ok(());
        }

        let mut conn = self.pool.get().await?;
        conn.setex(&self.key(jti), remaining as u64, reason.as_bytes())
            .await?;

        info!(jti, reason, ttl_secs = remaining, "Token revoked");

        Ok(())
    }

    pub async fn is_revoked(&self, jti: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        conn.exists(&self.key(jti)).await
    }
}
