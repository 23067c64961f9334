//! Integration tests for the stream broker adapter.
//!
//! Prerequisites:
//! - Kafka reachable at KAFKA_BROKERS (default localhost:9092)
//!
//! Run:
//! ```bash
//! export KAFKA_BROKERS=localhost:9092
//! cargo test --package stream-broker --test integration_test -- --ignored --nocapture
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use message_contracts::{
    AckKind, DispatchOutcome, InboundMessage, MessageDispatch, StreamBrokerConfig,
};
use stream_broker::{StreamPublisher, StreamSubscription};
use tokio::sync::watch;

fn test_config() -> StreamBrokerConfig {
    StreamBrokerConfig {
        bootstrap_servers: std::env::var("KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string()),
        username: None,
        password: None,
    }
}

/// Dispatch stub that fails the first `fail_times` deliveries, then acks.
struct FlakyDispatch {
    calls: AtomicU32,
    fail_times: u32,
}

#[async_trait]
impl MessageDispatch for FlakyDispatch {
    async fn dispatch(&self, _message: InboundMessage) -> DispatchOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            DispatchOutcome::Retry
        } else {
            DispatchOutcome::Ack(AckKind::Processed)
        }
    }
}

#[ignore = "Requires Kafka"]
#[tokio::test]
async fn retry_republish_redelivers_with_incremented_counter() {
    let config = test_config();
    let topic = format!("corebus-it-{}", uuid::Uuid::new_v4().simple());
    let publisher = Arc::new(StreamPublisher::new(&config).expect("producer"));

    let dispatch = Arc::new(FlakyDispatch {
        calls: AtomicU32::new(0),
        fail_times: 2,
    });
    let subscription = StreamSubscription::new(
        &config,
        "it-svc",
        &topic,
        publisher.clone(),
        dispatch.clone(),
    )
    .expect("subscription");

    publisher
        .publish_fresh(&topic, "ItHappened", r#"{"id":"it-1"}"#)
        .await
        .expect("publish");

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let run = tokio::spawn(async move { subscription.run(shutdown_rx).await });

    // Fresh delivery + two retry republishes, third attempt acks.
    tokio::time::sleep(Duration::from_secs(15)).await;
    shutdown_tx.send(()).expect("shutdown");
    run.await.expect("join");

    assert_eq!(dispatch.calls.load(Ordering::SeqCst), 3);
}
