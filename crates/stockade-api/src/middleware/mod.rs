//! Middleware: bearer auth and fixed-window rate limiting

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use stockade_core::cache::{CachedPrincipal, RateLimitDecision, RedisRateLimiter};
use stockade_core::config::RateLimitRule;
use stockade_core::{Error, Requester};

use crate::response::ApiError;
use crate::state::AppState;

/// JWT claims issued by the identity collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Token id, for blacklisting
    #[serde(default)]
    pub jti: String,
    pub exp: usize,
}

/// Authenticated principal attached to the request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

impl AuthUser {
    pub fn requester(&self) -> Requester {
        Requester {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            is_admin: self.is_admin,
        }
    }
}

impl From<CachedPrincipal> for AuthUser {
    fn from(p: CachedPrincipal) -> Self {
        Self {
            id: p.id,
            email: p.email,
            name: p.name,
            roles: p.roles,
            is_admin: p.is_admin,
        }
    }
}

fn bearer_token(request: &Request<Body>) -> Result<&str, ApiError> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError(Error::unauthorized("Missing bearer token")))
}

/// Verify the bearer token and attach an [`AuthUser`]
///
/// The token is authoritative; the principal cache only short-circuits the
/// enrichment lookup on hot paths and the blacklist vetoes revoked tokens.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)?;

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.security.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ApiError(Error::unauthorized(format!("Invalid token: {}", e))))?
    .claims;

    if !claims.jti.is_empty() {
        if let Some(blacklist) = &state.token_blacklist {
            let revoked = blacklist
                .is_revoked(&claims.jti)
                .await
                .unwrap_or_else(|e| {
                    // Cache trouble must not lock every user out
                    tracing::warn!(error = %e, "Blacklist check failed, allowing");
                    false
                });
            if revoked {
                return Err(ApiError(Error::unauthorized("Token revoked")));
            }
        }
    }

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError(Error::unauthorized("Malformed subject claim")))?;

    let cached = match &state.principal_cache {
        Some(cache) => cache.get(user_id).await.ok().flatten(),
        None => None,
    };

    let user = match cached {
        Some(principal) => AuthUser::from(principal),
        None => {
            let user = AuthUser {
                id: user_id,
                email: claims.email,
                name: claims.name,
                is_admin: claims.roles.iter().any(|r| r == "admin"),
                roles: claims.roles,
            };

            if let Some(cache) = &state.principal_cache {
                let principal = CachedPrincipal {
                    id: user.id,
                    email: user.email.clone(),
                    name: user.name.clone(),
                    roles: user.roles.clone(),
                    is_admin: user.is_admin,
                };
                if let Err(e) = cache.put(&principal).await {
                    tracing::debug!(error = %e, "Principal cache write failed");
                }
            }

            user
        }
    };

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Reject non-admin principals; must run after [`auth_middleware`]
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ApiError(Error::unauthorized("Not authenticated")))?;

    if !user.is_admin {
        return Err(ApiError(Error::forbidden("Admin role required")));
    }

    Ok(next.run(request).await)
}

/// In-memory fixed-window limiter, the fallback when Redis is not configured
pub struct MemoryRateLimiter {
    /// identifier -> (hits, window start)
    store: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check(&self, identifier: &str, rule: RateLimitRule) -> RateLimitDecision {
        let mut store = self.store.lock().await;
        let now = Instant::now();
        let window = Duration::from_secs(rule.window_secs);

        let entry = store.entry(identifier.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) > window {
            *entry = (0, now);
        }
        entry.0 += 1;

        let elapsed = now.duration_since(entry.1);
        RateLimitDecision {
            allowed: entry.0 <= rule.max_requests,
            remaining: rule.max_requests.saturating_sub(entry.0),
            retry_after_secs: window.saturating_sub(elapsed).as_secs().max(1),
        }
    }

    /// Drop expired windows; called opportunistically
    pub async fn cleanup(&self, max_window: Duration) {
        let mut store = self.store.lock().await;
        let now = Instant::now();
        store.retain(|_, (_, start)| now.duration_since(*start) <= max_window);
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Redis-backed limiting with in-memory fallback
pub struct RateLimiters {
    redis: Option<RedisRateLimiter>,
    memory: MemoryRateLimiter,
}

impl RateLimiters {
    pub fn new(redis: Option<RedisRateLimiter>) -> Self {
        Self {
            redis,
            memory: MemoryRateLimiter::new(),
        }
    }

    async fn check(&self, identifier: &str, rule: RateLimitRule) -> RateLimitDecision {
        if let Some(redis) = &self.redis {
            match redis.check(identifier, rule).await {
                Ok(decision) => return decision,
                Err(e) => {
                    tracing::warn!(error = %e, "Redis rate limit failed, using memory fallback");
                }
            }
        }
        self.memory.check(identifier, rule).await
    }

    pub async fn enforce(&self, identifier: &str, rule: RateLimitRule) -> Result<(), ApiError> {
        let decision = self.check(identifier, rule).await;
        if !decision.allowed {
            return Err(ApiError(Error::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            }));
        }
        Ok(())
    }
}

fn client_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-user limit on reservation creation
pub async fn rate_limit_create(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request.extensions().get::<AuthUser>().cloned();
    enforce_user_limit(&state, user.as_ref(), "create", state.config.rate_limiting.create).await?;
    Ok(next.run(request).await)
}

/// Per-user limit on checkout
pub async fn rate_limit_checkout(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request.extensions().get::<AuthUser>().cloned();
    enforce_user_limit(&state, user.as_ref(), "checkout", state.config.rate_limiting.checkout).await?;
    Ok(next.run(request).await)
}

/// Per-IP limit on everything else
pub async fn rate_limit_general(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if state.config.rate_limiting.enabled {
        let identifier = format!("ip:{}", client_ip(&request));
        state
            .rate_limiters
            .enforce(&identifier, state.config.rate_limiting.general)
            .await?;
    }
    Ok(next.run(request).await)
}

async fn enforce_user_limit(
    state: &AppState,
    user: Option<&AuthUser>,
    action: &str,
    rule: RateLimitRule,
) -> Result<(), ApiError> {
    if !state.config.rate_limiting.enabled {
        return Ok(());
    }

    let user = user.ok_or_else(|| ApiError(Error::unauthorized("Not authenticated")))?;

    let identifier = format!("user:{}:{}", user.id, action);
    state.rate_limiters.enforce(&identifier, rule).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_limiter_blocks_over_limit() {
        let limiter = MemoryRateLimiter::new();
        let rule = RateLimitRule {
            max_requests: 3,
            window_secs: 60,
        };

        for _ in 0..3 {
            assert!(limiter.check("user:1:create", rule).await.allowed);
        }
        let decision = limiter.check("user:1:create", rule).await;
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs >= 1);

        // Separate identifier has its own bucket
        assert!(limiter.check("user:2:create", rule).await.allowed);
    }

    #[tokio::test]
    async fn test_memory_limiter_cleanup() {
        let limiter = MemoryRateLimiter::new();
        let rule = RateLimitRule {
            max_requests: 1,
            window_secs: 0,
        };

        limiter.check("user:1:create", rule).await;
        limiter.cleanup(Duration::from_secs(0)).await;
        assert!(limiter.store.lock().await.is_empty());
    }

    #[test]
    fn test_claims_admin_detection() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: "ops@example.com".to_string(),
            name: "Ops".to_string(),
            roles: vec!["customer".to_string(), "admin".to_string()],
            jti: "jti-1".to_string(),
            exp: 2_000_000_000,
        };

        assert!(claims.roles.iter().any(|r| r == "admin"));
    }
}
