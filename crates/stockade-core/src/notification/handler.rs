//! Email event handler for the consumer pool

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{EmailMessage, EmailRenderer, EmailTransport, IdempotencyGuard};
use crate::bus::{BusError, BusResult, EventMessage, MessageHandler};

/// Renders and sends emails for reservation lifecycle and account events
///
/// Reservation events are deduplicated on `(reservationId, status)`; account
/// emails (`email.*`) are one-shot messages the producer already keys.
pub struct EmailEventHandler {
    renderer: EmailRenderer,
    transport: Arc<dyn EmailTransport>,
    guard: Arc<dyn IdempotencyGuard>,
}

impl EmailEventHandler {
    pub fn new(
        renderer: EmailRenderer,
        transport: Arc<dyn EmailTransport>,
        guard: Arc<dyn IdempotencyGuard>,
    ) -> Self {
        Self {
            renderer,
            transport,
            guard,
        }
    }

    fn idempotency_key(message: &EventMessage) -> Option<String> {
        let reservation_id = message.data.get("reservationId")?.as_str()?;
        let status = message.data.get("status")?.as_str()?;
        Some(format!("{}:{}", reservation_id, status))
    }
}

#[async_trait]
impl MessageHandler for EmailEventHandler {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn handle(&self, routing_key: &str, message: &EventMessage) -> BusResult<()> {
        if !self.renderer.has_template(routing_key) {
            debug!(routing_key, "No template for routing key, ignoring");
            return Ok(());
        }

        let recipient = if message.to.is_empty() {
            message
                .data
                .get("userEmail")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        } else {
            message.to.clone()
        };

        if recipient.is_empty() {
            // Sweeper-driven events carry no address; nothing to send
            debug!(routing_key, "Event without recipient, skipping email");
            return Ok(());
        }

        if routing_key.starts_with("reservation.") {
            match Self::idempotency_key(message) {
                Some(key) => {
                    let first = self
                        .guard
                        .claim(&key)
                        .await
                        .map_err(|e| BusError::Handler(e.to_string()))?;

                    if !first {
                        info!(routing_key, key, "Duplicate delivery, email already sent");
                        return Ok(());
                    }
                }
                None => {
                    warn!(routing_key, "Reservation event without idempotency fields");
                }
            }
        }

        let body = self
            .renderer
            .render(routing_key, &message.data)
            .map_err(|e| BusError::Handler(e.to_string()))?;

        let email = EmailMessage {
            to: recipient,
            subject: self.renderer.subject(routing_key).to_string(),
            body,
        };

        self.transport
            .send(&email)
            .await
            .map_err(|e| BusError::Handler(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::routing_keys;
    use crate::notification::MemoryIdempotencyGuard;
    use crate::Result;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Transport that records instead of sending
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send(&self, email: &EmailMessage) -> Result<()> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn handler_with_transport() -> (EmailEventHandler, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let handler = EmailEventHandler::new(
            EmailRenderer::new().unwrap(),
            transport.clone(),
            Arc::new(MemoryIdempotencyGuard::new()),
        );
        (handler, transport)
    }

    fn confirmed_event(reservation_id: Uuid) -> EventMessage {
        EventMessage::new(
            routing_keys::RESERVATION_CONFIRMED,
            serde_json::json!({
                "reservationId": reservation_id.to_string(),
                "reservationCode": "RSV-20260801-AAAA11",
                "userName": "Ada",
                "userEmail": "ada@example.com",
                "itemName": "Limited Sneaker",
                "quantity": 1,
                "totalPrice": "129.99",
                "status": "CONFIRMED",
            }),
            Uuid::new_v4(),
            "ada@example.com",
        )
    }

    #[tokio::test]
    async fn test_sends_exactly_one_email_per_transition() {
        let (handler, transport) = handler_with_transport();
        let event = confirmed_event(Uuid::new_v4());

        // Broker redelivers the same message twice
        handler
            .handle(routing_keys::RESERVATION_CONFIRMED, &event)
            .await
            .unwrap();
        handler
            .handle(routing_keys::RESERVATION_CONFIRMED, &event)
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.com");
        assert!(sent[0].body.contains("Limited Sneaker"));
    }

    #[tokio::test]
    async fn test_skips_events_without_recipient() {
        let (handler, transport) = handler_with_transport();

        let event = EventMessage::new(
            routing_keys::RESERVATION_EXPIRED,
            serde_json::json!({
                "reservationId": Uuid::new_v4().to_string(),
                "reservationCode": "RSV-1",
                "itemName": "Thing",
                "quantity": 1,
                "status": "EXPIRED",
            }),
            Uuid::new_v4(),
            "",
        );

        handler
            .handle(routing_keys::RESERVATION_EXPIRED, &event)
            .await
            .unwrap();

        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ignores_unknown_routing_keys() {
        let (handler, transport) = handler_with_transport();

        let event = EventMessage::new(
            "reservation.audited",
            serde_json::json!({}),
            Uuid::new_v4(),
            "ada@example.com",
        );

        handler.handle("reservation.audited", &event).await.unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
