//! # Outbox Publisher
//!
//! Polled drain of the outbox table. One pass, serialized process-wide by a
//! private mutex and across the fleet by a per-event distributed lock:
//!
//! 1. Open a command-side transaction.
//! 2. Read every outbox row, oldest first.
//! 3. Per row: take `LockEventId-{id}` (skip the row if another instance
//!    holds it). An `Active` row is published on its event type's declared
//!    exchange and transitioned to `Inactive`; an `Inactive` row (published
//!    on an earlier pass) is removed.
//! 4. Commit.
//! 5. Release every lock taken this pass, on success and failure alike.
//!
//! A publish failure rolls the whole pass back: rows stay `Active` and the
//! next pass retries them. A crash between broker publish and commit leaves
//! the row `Active` too, so the event goes out a second time — consumer-side
//! idempotency markers absorb the duplicate. Briefly after a rollback,
//! another instance can observe a still-`Active` row whose lock was just
//! released and publish it again; the lock's expiry semantics accept this
//! race by design.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use message_contracts::{
    EventCommandRepository, EventPublisher, IsolationLevel, RouteRegistry, StoreError, UnitOfWork,
};
use redis_cache::DistributedLock;

mod metrics;

pub use metrics::OutboxMetrics;

pub type OutboxResult<T> = Result<T, OutboxError>;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event type has no declared exchange route.
    #[error("no publish route declared for event type `{0}`")]
    RouteMissing(String),

    #[error("publish failed for event `{event_id}`: {source}")]
    Publish {
        event_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("distributed lock error: {0}")]
    Lock(#[source] anyhow::Error),
}

/// What one drain pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutboxPassReport {
    pub published: usize,
    pub removed: usize,
    /// Rows skipped because another instance held their lock.
    pub skipped: usize,
}

// The only process-global in the messaging core: at most one drain pass per
// process, whichever worker triggers it.
static DRAIN_MUTEX: Mutex<()> = Mutex::const_new(());

pub struct OutboxPublisher {
    repository: Arc<dyn EventCommandRepository>,
    uow: Arc<dyn UnitOfWork>,
    lock: DistributedLock,
    routes: Arc<RouteRegistry>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Option<OutboxMetrics>,
}

impl OutboxPublisher {
    pub fn new(
        repository: Arc<dyn EventCommandRepository>,
        uow: Arc<dyn UnitOfWork>,
        lock: DistributedLock,
        routes: Arc<RouteRegistry>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repository,
            uow,
            lock,
            routes,
            publisher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one drain pass. Serialized per process; safe to call from a
    /// scheduler and from an on-demand signal concurrently.
    pub async fn drain_once(&self) -> OutboxResult<OutboxPassReport> {
        let _serial = DRAIN_MUTEX.lock().await;

        let mut held_locks = Vec::new();
        let result = self.run_pass(&mut held_locks).await;

        if result.is_err() {
            // Whole-pass rollback; rows stay as they were.
            let _ = self.uow.rollback().await;
        }
        self.lock.release_all(&held_locks).await;

        match &result {
            Ok(report) => {
                if let Some(metrics) = &self.metrics {
                    metrics.published.inc_by(report.published as u64);
                }
                if report.published + report.removed > 0 {
                    info!(
                        published = report.published,
                        removed = report.removed,
                        skipped = report.skipped,
                        "outbox pass complete"
                    );
                } else {
                    debug!(skipped = report.skipped, "outbox pass found nothing to do");
                }
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.failed_passes.inc();
                }
                error!(error = %e, "outbox pass rolled back");
            }
        }

        result
    }

    async fn run_pass(&self, held_locks: &mut Vec<String>) -> OutboxResult<OutboxPassReport> {
        self.uow.begin(IsolationLevel::ReadCommitted).await?;

        let events = self.repository.find_all_ordered_by_date().await?;
        if let Some(metrics) = &self.metrics {
            let pending = events.iter().filter(|e| e.state.is_active()).count();
            metrics.pending.set(pending as i64);
        }

        let mut report = OutboxPassReport::default();
        for mut event in events {
            let acquired = self
                .lock
                .acquire(&event.id)
                .await
                .map_err(OutboxError::Lock)?;
            if !acquired {
                // Another instance owns this event for now.
                report.skipped += 1;
                continue;
            }
            held_locks.push(event.id.clone());

            if event.state.is_active() {
                let route = self
                    .routes
                    .route_for(&event.event_type)
                    .ok_or_else(|| OutboxError::RouteMissing(event.event_type.clone()))?;
                self.publisher
                    .publish_event(route, &event)
                    .await
                    .map_err(|source| OutboxError::Publish {
                        event_id: event.id.clone(),
                        source,
                    })?;

                event.deactivate();
                self.repository.change(&event).await?;
                report.published += 1;
            } else {
                // Published on an earlier pass; now clean it up.
                self.repository.remove(&event).await?;
                report.removed += 1;
            }
        }

        self.uow.commit().await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_contracts::{CacheStore, Event, EventRoute, TransactionSide};
    use message_store::memory::{
        MemoryEventCommandRepository, MemoryEventTable, MemoryUnitOfWork, RecordingEventPublisher,
    };
    use redis_cache::MemoryCacheStore;

    struct Fixture {
        publisher: OutboxPublisher,
        table: Arc<MemoryEventTable>,
        recorder: Arc<RecordingEventPublisher>,
        cache: Arc<MemoryCacheStore>,
    }

    fn fixture() -> Fixture {
        let table = MemoryEventTable::shared();
        let uow = MemoryUnitOfWork::new(TransactionSide::Command);
        let repository = Arc::new(MemoryEventCommandRepository::new(uow.clone(), table.clone()));
        let cache = MemoryCacheStore::shared();
        let recorder = RecordingEventPublisher::shared();

        let mut routes = RouteRegistry::new();
        routes
            .declare("OrderPlaced", EventRoute::direct("orders", "order.placed"))
            .unwrap();

        let publisher = OutboxPublisher::new(
            repository,
            uow,
            DistributedLock::new(cache.clone()),
            Arc::new(routes),
            recorder.clone(),
        );

        Fixture {
            publisher,
            table,
            recorder,
            cache,
        }
    }

    fn seed(table: &MemoryEventTable, id: &str) {
        let mut event =
            Event::new("OrderPlaced", &serde_json::json!({ "id": id })).unwrap();
        event.id = id.to_string();
        table.insert(event);
    }

    #[tokio::test]
    async fn active_row_is_published_then_removed_on_the_next_pass() {
        let f = fixture();
        seed(&f.table, "e1");

        let report = f.publisher.drain_once().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(f.recorder.published_count(), 1);
        assert!(!f.table.find("e1").unwrap().state.is_active());

        let report = f.publisher.drain_once().await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(f.table.find("e1").is_none());
    }

    #[tokio::test]
    async fn locked_row_is_skipped_not_failed() {
        let f = fixture();
        seed(&f.table, "e1");
        // Simulate another instance holding the event's lock.
        f.cache
            .set_if_not_exists("LockEventId-e1", "e1")
            .await
            .unwrap();

        let report = f.publisher.drain_once().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.published, 0);
        assert_eq!(f.recorder.published_count(), 0);
        // The row stays Active for a later pass.
        assert!(f.table.find("e1").unwrap().state.is_active());
        // The foreign lock was not released by our pass.
        assert!(f.cache.contains("LockEventId-e1").await);
    }

    #[tokio::test]
    async fn publish_failure_rolls_back_the_pass_and_releases_locks() {
        let f = fixture();
        seed(&f.table, "e1");
        f.recorder.fail_times(1);

        let err = f.publisher.drain_once().await.unwrap_err();
        assert!(matches!(err, OutboxError::Publish { .. }));
        assert!(f.table.find("e1").unwrap().state.is_active());
        assert!(f.cache.is_empty().await);

        // Broker recovered: the next pass publishes the same row.
        let report = f.publisher.drain_once().await.unwrap();
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn undeclared_route_fails_the_pass() {
        let f = fixture();
        let mut event = Event::new("UnroutedEvent", &serde_json::json!({ "id": "x" })).unwrap();
        event.id = "x".into();
        f.table.insert(event);

        let err = f.publisher.drain_once().await.unwrap_err();
        assert!(matches!(err, OutboxError::RouteMissing(name) if name == "UnroutedEvent"));
        assert!(f.cache.is_empty().await);
    }
}
