//! Email side effects driven from the consumer pool
//!
//! Rendering (handlebars) and transport (lettre) are separated so tests can
//! swap the transport. The handler is idempotent per
//! `(reservation, terminal status)`; at-least-once delivery from the broker
//! must not produce a second email.

pub mod handler;
pub mod idempotency;
pub mod sender;
pub mod templates;

pub use handler::EmailEventHandler;
pub use idempotency::{IdempotencyGuard, MemoryIdempotencyGuard, RedisIdempotencyGuard};
pub use sender::{EmailTransport, LogEmailSender, SmtpEmailSender};
pub use templates::EmailRenderer;

/// A rendered email ready for transport
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}
