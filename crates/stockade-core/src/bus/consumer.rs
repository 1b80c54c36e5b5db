//! Consumer pool: durable queues, prefetch, dead-lettering, reconnect
//!
//! Each registered queue gets its own consumer task. A message that fails to
//! decode or whose handler errors is copied to `<queue>.dead` together with
//! the error and then nacked without requeue; everything else is acked. The
//! consume loop reconnects at a fixed interval and the broker redelivers
//! whatever was in flight.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_lapin::{Manager, Pool};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BusError, BusResult, EventMessage};
use crate::config::BusConfig;

/// Per-message side-effect executor, dispatched by routing key
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, routing_key: &str, message: &EventMessage) -> BusResult<()>;
}

/// A durable queue bound to the exchange with a routing pattern
#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub queue: String,
    pub pattern: String,
    pub prefetch: u16,
}

impl QueueBinding {
    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dead", self.queue)
    }
}

/// Record written to the dead-letter queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Original payload, verbatim where it was valid JSON
    pub original: serde_json::Value,
    pub error: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
    pub retry_count: u32,
}

impl DeadLetter {
    fn from_delivery(payload: &[u8], error: &BusError) -> Self {
        let (original, retry_count) = match serde_json::from_slice::<EventMessage>(payload) {
            Ok(msg) => {
                let retry = msg.metadata.retry_count;
                (serde_json::to_value(&msg).unwrap_or_default(), retry)
            }
            Err(_) => (
                serde_json::Value::String(String::from_utf8_lossy(payload).into_owned()),
                0,
            ),
        };

        Self {
            original,
            error: error.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            retry_count,
        }
    }
}

/// Drains queues and runs side effects
pub struct ConsumerPool {
    pool: Pool,
    config: BusConfig,
    consumers: Vec<(QueueBinding, Arc<dyn MessageHandler>)>,
}

impl ConsumerPool {
    pub fn new(config: BusConfig) -> BusResult<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(8)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        Ok(Self {
            pool,
            config,
            consumers: Vec::new(),
        })
    }

    /// Register a handler for a queue; call before [`start`]
    pub fn register(&mut self, binding: QueueBinding, handler: Arc<dyn MessageHandler>) {
        self.consumers.push((binding, handler));
    }

    /// Spawn one consumer task per registered queue
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.consumers
            .iter()
            .map(|(binding, handler)| {
                let pool = self.pool.clone();
                let config = self.config.clone();
                let binding = binding.clone();
                let handler = handler.clone();

                tokio::spawn(async move {
                    consume_loop(pool, config, binding, handler).await;
                })
            })
            .collect()
    }
}

/// Consumer loop with fixed-interval reconnect
async fn consume_loop(
    pool: Pool,
    config: BusConfig,
    binding: QueueBinding,
    handler: Arc<dyn MessageHandler>,
) {
    loop {
        match setup_consumer(&pool, &config, &binding).await {
            Ok((channel, mut consumer)) => {
                info!(
                    queue = %binding.queue,
                    pattern = %binding.pattern,
                    handler = handler.name(),
                    "Consumer connected"
                );

                while let Some(delivery) = consumer.next().await {
                    match delivery {
                        Ok(delivery) => {
                            process_delivery(&channel, &binding, delivery, handler.as_ref())
                                .await;
                        }
                        Err(e) => {
                            error!(error = %e, queue = %binding.queue, "Delivery error, reconnecting");
                            break;
                        }
                    }
                }

                warn!(queue = %binding.queue, "Consumer stream ended, reconnecting");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    queue = %binding.queue,
                    interval_ms = config.reconnect_interval_ms,
                    "Consumer setup failed, retrying"
                );
            }
        }

        tokio::time::sleep(config.reconnect_interval()).await;
    }
}

/// Declare topology and start consuming
///
/// Queue, dead-letter queue and exchange are all durable; unacked messages
/// survive us and get redelivered by the broker.
async fn setup_consumer(
    pool: &Pool,
    config: &BusConfig,
    binding: &QueueBinding,
) -> BusResult<(Channel, lapin::Consumer)> {
    let conn = pool
        .get()
        .await
        .map_err(|e| BusError::Connection(format!("Failed to get connection: {}", e)))?;

    let channel = conn
        .create_channel()
        .await
        .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))?;

    for queue in [binding.queue.clone(), binding.dead_letter_queue()] {
        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(format!("Failed to declare queue {}: {}", queue, e)))?;
    }

    channel
        .queue_bind(
            &binding.queue,
            &config.exchange,
            &binding.pattern,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Consume(format!("Failed to bind queue: {}", e)))?;

    channel
        .basic_qos(binding.prefetch, BasicQosOptions::default())
        .await
        .map_err(|e| BusError::Consume(format!("Failed to set prefetch: {}", e)))?;

    let consumer = channel
        .basic_consume(
            &binding.queue,
            &format!("stockade-{}", binding.queue),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Consume(format!("Failed to start consumer: {}", e)))?;

    Ok((channel, consumer))
}

async fn process_delivery(
    channel: &Channel,
    binding: &QueueBinding,
    delivery: Delivery,
    handler: &dyn MessageHandler,
) {
    let routing_key = delivery.routing_key.as_str().to_string();

    let outcome = match serde_json::from_slice::<EventMessage>(&delivery.data) {
        Ok(message) => {
            debug!(routing_key = %routing_key, handler = handler.name(), "Dispatching message");
            handler.handle(&routing_key, &message).await
        }
        Err(e) => Err(BusError::Serialization(format!(
            "Failed to decode message: {}",
            e
        ))),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = delivery.ack(Default::default()).await {
                error!(error = %e, "Failed to ack message");
            }
        }
        Err(err) => {
            error!(
                routing_key = %routing_key,
                queue = %binding.queue,
                error = %err,
                "Message handling failed, dead-lettering"
            );

            if let Err(e) = dead_letter(channel, binding, &delivery.data, &err).await {
                // Leave the message unacked; the broker redelivers after
                // reconnect rather than losing it.
                error!(error = %e, "Failed to write dead letter, message stays unacked");
                return;
            }

            if let Err(e) = delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await
            {
                error!(error = %e, "Failed to nack message");
            }
        }
    }
}

/// Copy the failed payload plus diagnostics to `<queue>.dead`
async fn dead_letter(
    channel: &Channel,
    binding: &QueueBinding,
    payload: &[u8],
    err: &BusError,
) -> BusResult<()> {
    let record = DeadLetter::from_delivery(payload, err);
    let body = serde_json::to_vec(&record).map_err(|e| BusError::Serialization(e.to_string()))?;

    let confirm = channel
        .basic_publish(
            "", // default exchange routes straight to the queue
            &binding.dead_letter_queue(),
            BasicPublishOptions::default(),
            &body,
            BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2),
        )
        .await
        .map_err(|e| BusError::Publish(format!("Failed to publish dead letter: {}", e)))?;

    confirm
        .await
        .map_err(|e| BusError::Publish(format!("Dead letter confirmation failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_queue_name() {
        let binding = QueueBinding {
            queue: "stockade.emails".to_string(),
            pattern: "email.*".to_string(),
            prefetch: 5,
        };
        assert_eq!(binding.dead_letter_queue(), "stockade.emails.dead");
    }

    #[test]
    fn test_dead_letter_preserves_payload_and_retry_count() {
        let msg = EventMessage::new(
            "reservation.created",
            serde_json::json!({"reservationCode": "RSV-1"}),
            uuid::Uuid::nil(),
            "user@example.com",
        );
        let payload = serde_json::to_vec(&msg).unwrap();

        let record =
            DeadLetter::from_delivery(&payload, &BusError::Handler("smtp refused".to_string()));

        assert_eq!(record.original["data"]["reservationCode"], "RSV-1");
        assert_eq!(record.retry_count, 0);
        assert!(record.error.contains("smtp refused"));
    }

    #[test]
    fn test_dead_letter_handles_garbage_payload() {
        let record = DeadLetter::from_delivery(
            b"not json at all",
            &BusError::Serialization("bad".to_string()),
        );
        assert_eq!(
            record.original,
            serde_json::Value::String("not json at all".to_string())
        );
    }

    #[test]
    fn test_dead_letter_wire_shape() {
        let record = DeadLetter::from_delivery(b"{}", &BusError::Handler("x".to_string()));
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("retryCount").is_some());
        assert!(value.get("timestamp").is_some());
        assert!(value.get("error").is_some());
    }
}
