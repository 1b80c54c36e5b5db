//! Redis connection management

use std::future::Future;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::{CacheError, CacheResult};
use crate::config::CacheConfig;

/// Shared Redis handle with explicit reconnect tracking
#[derive(Clone)]
pub struct RedisPool {
    client: Arc<RedisClient>,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
    config: Arc<CacheConfig>,
}

impl RedisPool {
    /// Connect to Redis and validate with PING
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        let client = RedisClient::open(&config.url[..])
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let pool = Self {
            client: Arc::new(client),
            manager: Arc::new(RwLock::new(None)),
            config: Arc::new(config),
        };

        pool.reconnect().await?;

        info!(url = %pool.config.url, "Redis pool created");

        Ok(pool)
    }

    /// Get a connection; attempts reconnect when none is live
    pub async fn get(&self) -> CacheResult<RedisConnection> {
        if let Some(manager) = self.manager.read().await.as_ref() {
            return Ok(RedisConnection {
                manager: manager.clone(),
                config: self.config.clone(),
            });
        }

        self.reconnect().await?;

        let manager = self
            .manager
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| CacheError::Connection("No connection available".to_string()))?;

        Ok(RedisConnection {
            manager,
            config: self.config.clone(),
        })
    }

    /// Re-establish the managed connection, with bounded retries
    pub async fn reconnect(&self) -> CacheResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, "Redis connect attempt");

            match ConnectionManager::new((*self.client).clone()).await {
                Ok(mut manager) => {
                    let pong: String = redis::cmd("PING")
                        .query_async(&mut manager)
                        .await
                        .map_err(|e| CacheError::Connection(e.to_string()))?;

                    if pong != "PONG" {
                        return Err(CacheError::Connection("Redis PING failed".to_string()));
                    }

                    *self.manager.write().await = Some(manager);
                    return Ok(());
                }
                Err(e) => {
                    error!(attempt, error = %e, "Redis connection attempt failed");

                    if attempt >= self.config.max_retries {
                        *self.manager.write().await = None;
                        return Err(CacheError::Connection(format!(
                            "Failed to connect after {} attempts: {}",
                            attempt, e
                        )));
                    }

                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        match self.get().await {
            Ok(mut conn) => conn.ping().await.is_ok(),
            Err(_) => false,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// Single Redis connection wrapper
///
/// Every command runs under the configured operation timeout.
pub struct RedisConnection {
    manager: ConnectionManager,
    config: Arc<CacheConfig>,
}

impl RedisConnection {
    async fn bounded<T, F>(&self, fut: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.config.operation_timeout(), fut)
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    pub async fn ping(&mut self) -> CacheResult<()> {
        let mut manager = self.manager.clone();
        let _: String = self
            .bounded(async move { redis::cmd("PING").query_async(&mut manager).await })
            .await?;
        Ok(())
    }

    /// Set a key without expiry
    pub async fn set(&mut self, key: &str, value: &[u8]) -> CacheResult<()> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        let value = value.to_vec();
        let _: () = self
            .bounded(async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .query_async(&mut manager)
                    .await
            })
            .await?;
        Ok(())
    }

    /// Set a key with TTL
    pub async fn setex(&mut self, key: &str, ttl_secs: u64, value: &[u8]) -> CacheResult<()> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        let value = value.to_vec();
        let _: () = self
            .bounded(async move {
                redis::cmd("SETEX")
                    .arg(&key)
                    .arg(ttl_secs)
                    .arg(&value)
                    .query_async(&mut manager)
                    .await
            })
            .await?;
        Ok(())
    }

    /// Set a key with TTL only if it does not exist; true when set
    pub async fn set_nx_ex(&mut self, key: &str, ttl_secs: u64, value: &[u8]) -> CacheResult<bool> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        let value = value.to_vec();
        let result: Option<String> = self
            .bounded(async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async(&mut manager)
                    .await
            })
            .await?;
        Ok(result.is_some())
    }

    pub async fn get(&mut self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        self.bounded(async move { redis::cmd("GET").arg(&key).query_async(&mut manager).await })
            .await
    }

    pub async fn del(&mut self, key: &str) -> CacheResult<bool> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        let removed: i64 = self
            .bounded(async move { redis::cmd("DEL").arg(&key).query_async(&mut manager).await })
            .await?;
        Ok(removed > 0)
    }

    pub async fn exists(&mut self, key: &str) -> CacheResult<bool> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        let found: i64 = self
            .bounded(async move { redis::cmd("EXISTS").arg(&key).query_async(&mut manager).await })
            .await?;
        Ok(found > 0)
    }

    pub async fn expire(&mut self, key: &str, ttl_secs: u64) -> CacheResult<bool> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        let set: i64 = self
            .bounded(async move {
                redis::cmd("EXPIRE")
                    .arg(&key)
                    .arg(ttl_secs)
                    .query_async(&mut manager)
                    .await
            })
            .await?;
        Ok(set > 0)
    }

    pub async fn ttl(&mut self, key: &str) -> CacheResult<i64> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        self.bounded(async move { redis::cmd("TTL").arg(&key).query_async(&mut manager).await })
            .await
    }

    pub async fn incr(&mut self, key: &str) -> CacheResult<i64> {
        let mut manager = self.manager.clone();
        let key = key.to_string();
        self.bounded(async move { redis::cmd("INCR").arg(&key).query_async(&mut manager).await })
            .await
    }

    /// List keys matching a glob pattern
    pub async fn keys(&mut self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut manager = self.manager.clone();
        let pattern = pattern.to_string();
        self.bounded(async move {
            redis::cmd("KEYS")
                .arg(&pattern)
                .query_async(&mut manager)
                .await
        })
        .await
    }

    /// Delete every key matching a glob pattern; returns the count removed
    pub async fn delete_pattern(&mut self, pattern: &str) -> CacheResult<u64> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut manager = self.manager.clone();
        let removed: i64 = self
            .bounded(async move {
                let mut cmd = redis::cmd("DEL");
                for key in &keys {
                    cmd.arg(key);
                }
                cmd.query_async(&mut manager).await
            })
            .await?;

        Ok(removed as u64)
    }
}
