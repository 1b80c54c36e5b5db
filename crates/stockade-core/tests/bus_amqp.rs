//! Integration tests requiring a running RabbitMQ instance.
//!
//! Run with: AMQP_URL=amqp://localhost:5672 cargo test -- --ignored

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use stockade_core::bus::{
    routing_keys, BusError, BusResult, ConsumerPool, EventMessage, EventPublisher, MessageHandler,
    QueueBinding,
};
use stockade_core::config::BusConfig;
use stockade_core::AmqpEventPublisher;

fn bus_config() -> BusConfig {
    BusConfig {
        enabled: true,
        url: std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://127.0.0.1:5672".to_string()),
        exchange: format!("stockade.test.{}", Uuid::new_v4().simple()),
        reconnect_interval_ms: 500,
        ..BusConfig::default()
    }
}

struct CountingHandler {
    count: Arc<AtomicUsize>,
    tx: mpsc::Sender<EventMessage>,
    fail: bool,
}

#[async_trait]
impl MessageHandler for CountingHandler {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn handle(&self, _routing_key: &str, message: &EventMessage) -> BusResult<()> {
        if self.fail {
            return Err(BusError::Handler("forced failure".to_string()));
        }
        self.count.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(message.clone()).await;
        Ok(())
    }
}

fn test_message(code: &str) -> EventMessage {
    EventMessage::new(
        routing_keys::RESERVATION_CREATED,
        serde_json::json!({
            "reservationId": Uuid::new_v4().to_string(),
            "reservationCode": code,
            "status": "PENDING",
        }),
        Uuid::new_v4(),
        "user@example.com",
    )
}

#[tokio::test]
#[ignore = "Requires RabbitMQ"]
async fn test_publish_and_consume() {
    let config = bus_config();
    let queue = format!("test-queue-{}", Uuid::new_v4().simple());

    let publisher = AmqpEventPublisher::new(config.clone()).unwrap();

    let mut consumers = ConsumerPool::new(config.clone()).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::channel(10);
    consumers.register(
        QueueBinding {
            queue: queue.clone(),
            pattern: routing_keys::RESERVATION_PATTERN.to_string(),
            prefetch: 10,
        },
        Arc::new(CountingHandler {
            count: count.clone(),
            tx,
            fail: false,
        }),
    );
    let _handles = consumers.start();

    // Give the consumer time to declare and bind
    tokio::time::sleep(Duration::from_millis(300)).await;

    publisher
        .publish(routing_keys::RESERVATION_CREATED, &test_message("RSV-1"))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for message")
        .expect("Channel closed");

    assert_eq!(received.data["reservationCode"], "RSV-1");
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore = "Requires RabbitMQ"]
async fn test_failed_messages_are_dead_lettered() {
    let config = bus_config();
    let queue = format!("test-dlq-{}", Uuid::new_v4().simple());

    let publisher = AmqpEventPublisher::new(config.clone()).unwrap();

    let mut consumers = ConsumerPool::new(config.clone()).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, _rx) = mpsc::channel(10);
    consumers.register(
        QueueBinding {
            queue: queue.clone(),
            pattern: routing_keys::RESERVATION_PATTERN.to_string(),
            prefetch: 10,
        },
        Arc::new(CountingHandler {
            count: count.clone(),
            tx,
            fail: true,
        }),
    );
    let _handles = consumers.start();

    tokio::time::sleep(Duration::from_millis(300)).await;

    publisher
        .publish(routing_keys::RESERVATION_CREATED, &test_message("RSV-DLQ"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    // Read the dead-letter copy directly
    let conn = lapin::Connection::connect(&config.url, lapin::ConnectionProperties::default())
        .await
        .unwrap();
    let channel = conn.create_channel().await.unwrap();

    let dead = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(message) = channel
                .basic_get(&format!("{}.dead", queue), lapin::options::BasicGetOptions::default())
                .await
                .unwrap()
            {
                break message;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("Timed out waiting for dead letter");

    let record: serde_json::Value = serde_json::from_slice(&dead.delivery.data).unwrap();
    assert_eq!(record["original"]["data"]["reservationCode"], "RSV-DLQ");
    assert!(record["error"].as_str().unwrap().contains("forced failure"));
    assert!(record["timestamp"].is_i64());
    assert_eq!(record["retryCount"], 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[ignore = "Requires RabbitMQ"]
async fn test_messages_survive_consumer_downtime() {
    // Publish first, attach the consumer afterwards: the durable queue must
    // hand over everything that arrived while nobody was listening.
    let config = bus_config();
    let queue = format!("test-offline-{}", Uuid::new_v4().simple());

    // Declare and bind the queue up front so the published message has a home
    let conn = lapin::Connection::connect(&config.url, lapin::ConnectionProperties::default())
        .await
        .unwrap();
    let channel = conn.create_channel().await.unwrap();
    channel
        .exchange_declare(
            &config.exchange,
            lapin::ExchangeKind::Topic,
            lapin::options::ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            lapin::types::FieldTable::default(),
        )
        .await
        .unwrap();
    channel
        .queue_declare(
            &queue,
            lapin::options::QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            lapin::types::FieldTable::default(),
        )
        .await
        .unwrap();
    channel
        .queue_bind(
            &queue,
            &config.exchange,
            routing_keys::RESERVATION_PATTERN,
            lapin::options::QueueBindOptions::default(),
            lapin::types::FieldTable::default(),
        )
        .await
        .unwrap();

    let publisher = AmqpEventPublisher::new(config.clone()).unwrap();
    for i in 0..3 {
        publisher
            .publish(
                routing_keys::RESERVATION_CREATED,
                &test_message(&format!("RSV-{}", i)),
            )
            .await
            .unwrap();
    }

    // Now bring the consumer up
    let mut consumers = ConsumerPool::new(config.clone()).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::channel(10);
    consumers.register(
        QueueBinding {
            queue: queue.clone(),
            pattern: routing_keys::RESERVATION_PATTERN.to_string(),
            prefetch: 10,
        },
        Arc::new(CountingHandler {
            count: count.clone(),
            tx,
            fail: false,
        }),
    );
    let _handles = consumers.start();

    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timed out")
            .expect("Channel closed");
    }

    assert_eq!(count.load(Ordering::SeqCst), 3);
}
