//! Domain event bus: topic exchange, routed JSON messages
//!
//! Events are published to a durable topic exchange and consumed from durable
//! queues bound by routing pattern. Delivery is at-least-once; consumers must
//! be idempotent.

pub mod consumer;
pub mod publisher;

pub use consumer::{ConsumerPool, DeadLetter, MessageHandler, QueueBinding};
pub use publisher::AmqpEventPublisher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Item, Reservation};

/// Routing keys are first-class constants; everything routed through the
/// exchange uses one of these.
pub mod routing_keys {
    pub const RESERVATION_CREATED: &str = "reservation.created";
    pub const RESERVATION_CONFIRMED: &str = "reservation.confirmed";
    pub const RESERVATION_CANCELLED: &str = "reservation.cancelled";
    pub const RESERVATION_EXPIRED: &str = "reservation.expired";

    pub const EMAIL_VERIFICATION: &str = "email.verification";
    pub const EMAIL_PASSWORD_RESET: &str = "email.password_reset";
    pub const EMAIL_PASSWORD_CHANGED: &str = "email.password_changed";
    pub const EMAIL_ACCOUNT_APPROVAL: &str = "email.account_approval";

    /// Binding pattern for the reservation lifecycle queue
    pub const RESERVATION_PATTERN: &str = "reservation.*";

    /// Binding pattern for the email queue
    pub const EMAIL_PATTERN: &str = "email.*";
}

/// Bus result type alias
pub type BusResult<T> = Result<T, BusError>;

/// Bus-specific error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Bus connection error: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

impl From<BusError> for crate::Error {
    fn from(err: BusError) -> Self {
        crate::Error::Bus(err.to_string())
    }
}

/// Wire envelope for every message on the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub metadata: EventMetadata,
    /// Recipient hint for email-producing consumers
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub user_id: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
    pub retry_count: u32,
}

impl EventMessage {
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        user_id: Uuid,
        to: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: EventMetadata {
                user_id: user_id.to_string(),
                timestamp: Utc::now().timestamp_millis(),
                retry_count: 0,
            },
            to: to.into(),
        }
    }
}

/// Payload carried by reservation lifecycle events; enough context for
/// downstream email rendering without a database read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEventData {
    pub reservation_id: Uuid,
    pub reservation_code: String,
    /// Absent on sweeper-driven transitions; user identity lives outside the
    /// core and only request-scoped flows have it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub item_name: String,
    pub quantity: i32,
    pub total_price: Decimal,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

/// Build a lifecycle event for a reservation
///
/// `user` is `(name, email)` when the triggering flow knows the customer.
pub fn reservation_event(
    routing_key: &str,
    reservation: &Reservation,
    item: &Item,
    user: Option<(&str, &str)>,
) -> BusResult<EventMessage> {
    let data = ReservationEventData {
        reservation_id: reservation.id,
        reservation_code: reservation.reservation_code.clone(),
        user_name: user.map(|(name, _)| name.to_string()),
        user_email: user.map(|(_, email)| email.to_string()),
        item_name: item.name.clone(),
        quantity: reservation.quantity,
        total_price: reservation.total_price,
        status: reservation.status.to_string(),
        expires_at: reservation.expires_at,
        cancellation_reason: reservation.cancellation_reason.clone(),
    };

    let to = user.map(|(_, email)| email.to_string()).unwrap_or_default();
    let data = serde_json::to_value(&data).map_err(|e| BusError::Serialization(e.to_string()))?;

    Ok(EventMessage::new(routing_key, data, reservation.user_id, to))
}

/// Publisher seam; the coordinator and sweeper depend on this, not on AMQP
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, message: &EventMessage) -> BusResult<()>;
}

/// Publisher that drops everything; used when the bus is disabled
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, routing_key: &str, _message: &EventMessage) -> BusResult<()> {
        tracing::debug!(routing_key, "Bus disabled, dropping event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let msg = EventMessage::new(
            routing_keys::RESERVATION_CREATED,
            serde_json::json!({"reservationCode": "RSV-1"}),
            Uuid::nil(),
            "user@example.com",
        );

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "reservation.created");
        assert_eq!(value["to"], "user@example.com");
        assert!(value["metadata"]["userId"].is_string());
        assert!(value["metadata"]["timestamp"].is_i64());
        assert_eq!(value["metadata"]["retryCount"], 0);
    }

    #[test]
    fn test_reservation_event_data_is_camel_case() {
        use crate::models::{ItemStatus, ReservationStatus};
        use chrono::Utc;
        use rust_decimal_macros::dec;

        let now = Utc::now();
        let item = Item {
            id: Uuid::new_v4(),
            sku: "SKU-1".into(),
            name: "Thing".into(),
            description: None,
            price: dec!(10.00),
            stock: 5,
            reserved_stock: 1,
            available_stock: 4,
            status: ItemStatus::Active,
            sale_start_date: None,
            sale_end_date: None,
            max_per_user: 2,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let reservation = Reservation {
            id: Uuid::new_v4(),
            reservation_code: "RSV-20260801-AAAA11".into(),
            user_id: Uuid::new_v4(),
            item_id: item.id,
            quantity: 1,
            unit_price: dec!(10.00),
            total_price: dec!(10.00),
            status: ReservationStatus::Pending,
            expires_at: now,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let msg = reservation_event(
            routing_keys::RESERVATION_CREATED,
            &reservation,
            &item,
            Some(("Ada", "ada@example.com")),
        )
        .unwrap();

        assert_eq!(msg.data["reservationCode"], "RSV-20260801-AAAA11");
        assert_eq!(msg.data["itemName"], "Thing");
        assert_eq!(msg.data["userEmail"], "ada@example.com");
        assert_eq!(msg.data["totalPrice"], "10.00");
        assert_eq!(msg.to, "ada@example.com");
        assert!(msg.data.get("cancellationReason").is_none());

        // Sweeper-driven events carry no user identity
        let anon = reservation_event(
            routing_keys::RESERVATION_EXPIRED,
            &reservation,
            &item,
            None,
        )
        .unwrap();
        assert!(anon.data.get("userEmail").is_none());
        assert_eq!(anon.to, "");
    }
}
