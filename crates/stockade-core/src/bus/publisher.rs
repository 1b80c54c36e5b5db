//! AMQP event publisher
//!
//! Publishes JSON envelopes to a durable topic exchange with persistent
//! delivery. Connections come from a lazy pool, so the publisher can be
//! constructed while the broker is down; each publish makes a bounded number
//! of attempts with a fixed delay and then gives up. A lost
//! `reservation.created` is tolerable — the sweeper guarantees eventual
//! cleanup of holds the customer never hears about.

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool};
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use tracing::{debug, error, warn};

use super::{BusError, BusResult, EventMessage, EventPublisher};
use crate::config::BusConfig;

pub struct AmqpEventPublisher {
    pool: Pool,
    config: BusConfig,
}

impl AmqpEventPublisher {
    /// Build the publisher; does not touch the network
    pub fn new(config: BusConfig) -> BusResult<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(8)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        Ok(Self { pool, config })
    }

    /// Open a channel and make sure the exchange exists
    ///
    /// The declare is idempotent; doing it per channel keeps the publisher
    /// correct across broker restarts.
    async fn get_channel(&self) -> BusResult<Channel> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to get connection: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))?;

        Ok(channel)
    }

    async fn try_publish(&self, routing_key: &str, payload: &[u8]) -> BusResult<()> {
        let channel = self.get_channel().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        let confirm = channel
            .basic_publish(
                &self.config.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;

        confirm
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(&self, routing_key: &str, message: &EventMessage) -> BusResult<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| BusError::Serialization(e.to_string()))?;

        let mut last_error = None;

        for attempt in 1..=self.config.publish_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.reconnect_interval()).await;
            }

            match self.try_publish(routing_key, &payload).await {
                Ok(()) => {
                    debug!(
                        exchange = %self.config.exchange,
                        routing_key,
                        "Published event"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.config.publish_attempts,
                        routing_key,
                        error = %e,
                        "Publish attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| BusError::Publish("No publish attempts made".to_string()));
        error!(routing_key, error = %err, "Giving up on publish");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_builds_without_broker() {
        let publisher = AmqpEventPublisher::new(BusConfig::default());
        assert!(publisher.is_ok());
    }
}
