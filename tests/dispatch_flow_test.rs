//! End-to-end consumer dispatch scenarios over the in-memory stores.
//!
//! Covers: duplicate consume, bounded retries with the after-max hook,
//! unknown types on a shared topic, and cache invalidation tied to the
//! transaction outcome.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use consumer_dispatch::DispatchEngine;
use failure_log::FailureLogger;
use message_contracts::{
    AckKind, CacheStore, ConsumeMessage, DispatchOutcome, HandlerMetadata, HandlerRegistry,
    InboundMessage, IsolationLevel, MessageDispatch, TransactionSide,
};
use message_store::memory::MemoryScopeFactory;
use redis_cache::MemoryCacheStore;
use serde::Deserialize;

#[derive(Deserialize)]
struct OrderPlaced {
    #[allow(dead_code)]
    id: String,
}

/// Handler that counts invocations; optionally always fails.
#[derive(Default)]
struct CountingHandler {
    handled: AtomicU32,
    after_max: AtomicU32,
    always_fail: bool,
}

#[async_trait]
impl ConsumeMessage<OrderPlaced> for Arc<CountingHandler> {
    async fn handle(&self, _message: OrderPlaced) -> anyhow::Result<()> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            anyhow::bail!("handler refuses this message");
        }
        Ok(())
    }

    async fn after_max_retry(&self, _message: OrderPlaced) -> anyhow::Result<()> {
        self.after_max.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    engine: DispatchEngine,
    scopes: Arc<MemoryScopeFactory>,
    cache: Arc<MemoryCacheStore>,
    handler: Arc<CountingHandler>,
}

fn fixture(metadata: HandlerMetadata, always_fail: bool) -> Fixture {
    let handler = Arc::new(CountingHandler {
        always_fail,
        ..Default::default()
    });
    let mut registry = HandlerRegistry::new();
    registry
        .register::<OrderPlaced, _>("OrderPlaced", handler.clone(), metadata)
        .unwrap();

    let scopes = Arc::new(MemoryScopeFactory::new());
    let cache = MemoryCacheStore::shared();
    let engine = DispatchEngine::new(
        "orders-svc",
        Arc::new(registry),
        scopes.clone(),
        cache.clone(),
        Arc::new(FailureLogger::new()),
    );

    Fixture {
        engine,
        scopes,
        cache,
        handler,
    }
}

fn delivery(id: &str, retry_count: u32) -> InboundMessage {
    InboundMessage {
        type_name: "OrderPlaced".into(),
        payload: format!(r#"{{"id":"{id}"}}"#),
        retry_count,
    }
}

#[tokio::test]
async fn s3_duplicate_consume_applies_effects_once() {
    let f = fixture(
        HandlerMetadata::message()
            .transaction(TransactionSide::Query, IsolationLevel::ReadCommitted),
        false,
    );

    let first = f.engine.dispatch(delivery("m1", 0)).await;
    let second = f.engine.dispatch(delivery("m1", 0)).await;

    assert_eq!(first, DispatchOutcome::Ack(AckKind::Processed));
    assert_eq!(second, DispatchOutcome::Ack(AckKind::AlreadyProcessed));
    assert_eq!(f.handler.handled.load(Ordering::SeqCst), 1);
    assert_eq!(f.scopes.query_markers.len(), 1);
    assert!(f.scopes.query_markers.contains("m1"));
}

/// Drives the engine the way the stream transport does: a `Retry` outcome
/// becomes a redelivery with the counter incremented.
async fn drive_until_terminal(f: &Fixture, id: &str) -> (AckKind, Vec<u32>) {
    let mut retry_count = 0;
    let mut counters_seen = Vec::new();
    loop {
        counters_seen.push(retry_count);
        match f.engine.dispatch(delivery(id, retry_count)).await {
            DispatchOutcome::Retry => retry_count += 1,
            DispatchOutcome::Ack(kind) => return (kind, counters_seen),
        }
        assert!(retry_count <= 10, "retry loop failed to terminate");
    }
}

#[tokio::test]
async fn s4_retry_exhaustion_runs_hook_once_then_terminates() {
    let f = fixture(
        HandlerMetadata::stream("orders")
            .max_retry(2)
            .with_after_max_hook()
            .transaction(TransactionSide::Query, IsolationLevel::ReadCommitted),
        true,
    );

    let (terminal, counters_seen) = drive_until_terminal(&f, "m2").await;

    // Attempted exactly max_retry + 1 times, then given up on.
    assert_eq!(terminal, AckKind::MaxRetryExceeded);
    assert_eq!(f.handler.handled.load(Ordering::SeqCst), 3);
    assert_eq!(f.handler.after_max.load(Ordering::SeqCst), 1);
    // Counters 0..=2 were attempts; 3 hit the ceiling; no 4 ever existed.
    assert_eq!(counters_seen, vec![0, 1, 2, 3]);
    // Nothing ever committed.
    assert!(f.scopes.query_markers.is_empty());
}

#[tokio::test]
async fn s5_unknown_type_is_acked_with_no_side_effects() {
    let f = fixture(
        HandlerMetadata::message()
            .transaction(TransactionSide::Query, IsolationLevel::ReadCommitted),
        false,
    );

    let outcome = f
        .engine
        .dispatch(InboundMessage {
            type_name: "NoSuchType".into(),
            payload: r#"{"id":"m3"}"#.into(),
            retry_count: 0,
        })
        .await;

    assert_eq!(outcome, DispatchOutcome::Ack(AckKind::UnknownType));
    assert_eq!(f.handler.handled.load(Ordering::SeqCst), 0);
    assert!(f.scopes.query_markers.is_empty());
    assert!(f.scopes.command_markers.is_empty());
}

#[tokio::test]
async fn cache_keys_are_deleted_on_commit_and_kept_on_rollback() {
    // Committing handler: declared keys disappear.
    let f = fixture(
        HandlerMetadata::message()
            .transaction(TransactionSide::Query, IsolationLevel::ReadCommitted)
            .clean_cache("A|B|C"),
        false,
    );
    for key in ["A", "B", "C"] {
        f.cache.set_if_not_exists(key, "cached").await.unwrap();
    }

    let outcome = f.engine.dispatch(delivery("m4", 0)).await;
    assert_eq!(outcome, DispatchOutcome::Ack(AckKind::Processed));
    for key in ["A", "B", "C"] {
        assert!(!f.cache.contains(key).await, "{key} should be invalidated");
    }

    // Failing handler: rollback, and no deletes happen.
    let f = fixture(
        HandlerMetadata::message()
            .transaction(TransactionSide::Query, IsolationLevel::ReadCommitted)
            .clean_cache("A|B|C"),
        true,
    );
    for key in ["A", "B", "C"] {
        f.cache.set_if_not_exists(key, "cached").await.unwrap();
    }

    let outcome = f.engine.dispatch(delivery("m5", 0)).await;
    assert_eq!(outcome, DispatchOutcome::Retry);
    for key in ["A", "B", "C"] {
        assert!(f.cache.contains(key).await, "{key} must survive a rollback");
    }
    assert!(f.scopes.query_markers.is_empty());
}

#[tokio::test]
async fn redeliveries_after_a_late_ack_failure_are_absorbed() {
    // A consumer that processed successfully but whose ack/commit to the
    // transport was lost sees the same message again; the marker absorbs it.
    let f = fixture(
        HandlerMetadata::message()
            .transaction(TransactionSide::Query, IsolationLevel::ReadCommitted),
        false,
    );

    for _ in 0..5 {
        f.engine.dispatch(delivery("m6", 0)).await;
    }

    assert_eq!(f.handler.handled.load(Ordering::SeqCst), 1);
    assert_eq!(f.scopes.query_markers.len(), 1);
}
