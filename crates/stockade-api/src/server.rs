//! Server wiring: construct collaborators, start background loops, serve

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use stockade_core::bus::{AmqpEventPublisher, ConsumerPool, EventPublisher, NoopPublisher};
use stockade_core::cache::{PrincipalCache, RedisPool, RedisRateLimiter, TokenBlacklist};
use stockade_core::db::migrate::auto_migrate;
use stockade_core::notification::{
    EmailEventHandler, EmailRenderer, EmailTransport, IdempotencyGuard, LogEmailSender,
    MemoryIdempotencyGuard, RedisIdempotencyGuard, SmtpEmailSender,
};
use stockade_core::{
    routing_keys, Config, Database, Error, ExpirySweeper, QueueBinding, ReservationCoordinator,
    ReservationStore, Result, StockLedger,
};

use crate::middleware::RateLimiters;
use crate::routes::build_router;
use crate::state::AppState;

pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid host: {}", e)))?,
        config.server.port,
    ));

    let state = create_app_state(&config).await?;

    // Background loops live for the lifetime of the process
    let _sweeper_handle = state.sweeper.clone().start();
    start_consumers(&config, &state)?;

    // Request deadline: a cancelled request drops its transaction, which
    // rolls back and releases any row lock without committing stock changes.
    let app = build_router(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Stockade API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Other(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| Error::Other(format!("Server error: {}", e)))?;

    Ok(())
}

/// Build the shared application state from configuration
pub async fn create_app_state(config: &Config) -> Result<AppState> {
    let pool = stockade_core::create_pool(&config.database).await?;
    auto_migrate(&pool, config.database.auto_migrate).await?;

    let db = Database::new(pool);
    let ledger = StockLedger::new(db.clone());
    let store = ReservationStore::new(db.clone());

    let redis = connect_redis(config).await;

    let publisher: Arc<dyn EventPublisher> = if config.bus.enabled {
        Arc::new(
            AmqpEventPublisher::new(config.bus.clone())
                .map_err(|e| Error::Config(format!("Bus setup failed: {}", e)))?,
        )
    } else {
        warn!("Bus disabled; domain events will be dropped");
        Arc::new(NoopPublisher)
    };

    let coordinator = Arc::new(ReservationCoordinator::new(
        db.clone(),
        ledger.clone(),
        store.clone(),
        publisher.clone(),
        config.reservations.clone(),
    ));

    let sweeper = Arc::new(ExpirySweeper::new(
        db.clone(),
        ledger.clone(),
        store,
        publisher,
        config.reservations.clone(),
    ));

    let rate_limiters = Arc::new(RateLimiters::new(
        redis.clone().map(RedisRateLimiter::new),
    ));

    let token_blacklist = redis.clone().map(|pool| Arc::new(TokenBlacklist::new(pool)));
    let principal_cache = redis
        .clone()
        .map(|pool| Arc::new(PrincipalCache::new(pool, config.cache.user_ttl_secs)));

    Ok(AppState {
        db,
        ledger,
        coordinator,
        sweeper,
        config: Arc::new(config.clone()),
        redis,
        rate_limiters,
        token_blacklist,
        principal_cache,
    })
}

async fn connect_redis(config: &Config) -> Option<RedisPool> {
    if !config.cache.enabled {
        return None;
    }

    match RedisPool::new(config.cache.clone()).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            // Cache is an accelerator, not a dependency; run without it
            warn!(error = %e, "Redis unavailable, using in-memory fallbacks");
            None
        }
    }
}

/// Start the consumer pool for email side effects
fn start_consumers(config: &Config, state: &AppState) -> Result<()> {
    if !config.bus.enabled {
        return Ok(());
    }

    let transport: Arc<dyn EmailTransport> = if config.notifications.smtp_enabled {
        Arc::new(SmtpEmailSender::new(&config.notifications)?)
    } else {
        Arc::new(LogEmailSender)
    };

    // Cross-instance dedupe needs Redis; a single instance is fine in memory
    let guard: Arc<dyn IdempotencyGuard> = match &state.redis {
        Some(pool) => Arc::new(RedisIdempotencyGuard::new(pool.clone())),
        None => Arc::new(MemoryIdempotencyGuard::new()),
    };

    let handler = Arc::new(EmailEventHandler::new(
        EmailRenderer::new()?,
        transport,
        guard,
    ));

    let mut consumers = ConsumerPool::new(config.bus.clone())
        .map_err(|e| Error::Config(format!("Consumer setup failed: {}", e)))?;

    consumers.register(
        QueueBinding {
            queue: config.bus.email_queue.clone(),
            pattern: routing_keys::EMAIL_PATTERN.to_string(),
            prefetch: config.bus.prefetch_email,
        },
        handler.clone(),
    );

    consumers.register(
        QueueBinding {
            queue: config.bus.reservation_queue.clone(),
            pattern: routing_keys::RESERVATION_PATTERN.to_string(),
            prefetch: config.bus.prefetch_reservation,
        },
        handler,
    );

    let handles = consumers.start();
    info!(consumers = handles.len(), "Consumer pool started");

    Ok(())
}
