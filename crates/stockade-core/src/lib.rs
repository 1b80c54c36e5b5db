pub mod bus;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod notification;
pub mod store;
pub mod sweeper;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Requester, ReservationCoordinator};
pub use db::{create_pool, Database};
pub use error::{Error, Result};
pub use ledger::{StockInconsistency, StockLedger};
pub use models::{Item, ItemStatus, Pagination, Reservation, ReservationStatus};
pub use store::ReservationStore;
pub use sweeper::{ExpirySweeper, HealthStatus, SweepOutcome, SweeperHealth};

pub use bus::{
    routing_keys, AmqpEventPublisher, ConsumerPool, EventMessage, EventPublisher, MessageHandler,
    NoopPublisher, QueueBinding,
};
pub use cache::{CachedPrincipal, PrincipalCache, RedisPool, RedisRateLimiter, TokenBlacklist};
pub use notification::{
    EmailEventHandler, EmailRenderer, EmailTransport, IdempotencyGuard, LogEmailSender,
    MemoryIdempotencyGuard, RedisIdempotencyGuard, SmtpEmailSender,
};

/// Current version of stockade
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_creation() {
        let err = Error::validation("Test validation error");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "validation");
    }
}
