//! Cached user principals
//!
//! Token verification is the authentication collaborator's job; what the core
//! offers is a TTL'd projection of the resolved principal so hot request
//! paths skip the user lookup.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{CacheNamespace, CacheResult, RedisPool};

/// Resolved user identity as cached for request handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPrincipal {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

pub struct PrincipalCache {
    pool: RedisPool,
    ttl_secs: u64,
}

impl PrincipalCache {
    pub fn new(pool: RedisPool, ttl_secs: u64) -> Self {
        Self { pool, ttl_secs }
    }

    fn key(&self, user_id: Uuid) -> String {
        format!(
            "{}:{}",
            self.pool.key_prefix(),
            CacheNamespace::Principal.key(user_id.to_string())
        )
    }

    pub async fn get(&self, user_id: Uuid) -> CacheResult<Option<CachedPrincipal>> {
        let mut conn = self.pool.get().await?;

        match conn.get(&self.key(user_id)).await? {
            Some(data) => match serde_json::from_slice(&data) {
                Ok(principal) => Ok(Some(principal)),
                Err(e) => {
                    // Stale shape from an older build; drop it
                    debug!(user_id = %user_id, error = %e, "Evicting undecodable principal");
                    conn.del(&self.key(user_id)).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn put(&self, principal: &CachedPrincipal) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let data = serde_json::to_vec(principal)
            .map_err(|e| super::CacheError::Serialization(e.to_string()))?;

        conn.setex(&self.key(principal.id), self.ttl_secs, &data).await
    }

    pub async fn invalidate(&self, user_id: Uuid) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        conn.del(&self.key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_roundtrip_shape() {
        let principal = CachedPrincipal {
            id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
            roles: vec!["customer".to_string()],
            is_admin: false,
        };

        let json = serde_json::to_vec(&principal).unwrap();
        let back: CachedPrincipal = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.id, principal.id);
        assert_eq!(back.roles, principal.roles);
    }
}
