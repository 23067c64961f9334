//! Persistence contracts: the outbox repository, the two inbox repositories,
//! and the unit-of-work the repositories enlist in.
//!
//! The command and query sides are distinct traits selected at dispatch time
//! from the handler's declared side — never by downcasting a shared handle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::metadata::{IsolationLevel, TransactionSide};
use crate::model::{ConsumerEvent, Event};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),

    /// A write that must be transactional was attempted with no open
    /// transaction on its unit of work.
    #[error("no active transaction on the {0:?} unit of work")]
    NoActiveTransaction(TransactionSide),

    #[error("a transaction is already active on the {0:?} unit of work")]
    TransactionAlreadyActive(TransactionSide),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One database transaction boundary, tagged with its side. A fresh instance
/// is created per delivery scope (and per outbox pass); `begin` opens a
/// transaction at the requested isolation level, after which the repositories
/// bound to the same unit of work execute inside it.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn side(&self) -> TransactionSide;

    async fn begin(&self, isolation: IsolationLevel) -> StoreResult<()>;

    async fn commit(&self) -> StoreResult<()>;

    /// Idempotent: rolling back with no active transaction is a no-op, so
    /// error paths can call it unconditionally.
    async fn rollback(&self) -> StoreResult<()>;
}

/// Command-side store of outbox rows.
#[async_trait]
pub trait EventCommandRepository: Send + Sync {
    /// Insert a captured event. Must be called inside the same business
    /// transaction as the state change the event describes.
    async fn add(&self, event: &Event) -> StoreResult<()>;

    /// All rows, oldest first by creation date. The publisher drains them in
    /// this order.
    async fn find_all_ordered_by_date(&self) -> StoreResult<Vec<Event>>;

    async fn change(&self, event: &Event) -> StoreResult<()>;

    async fn remove(&self, event: &Event) -> StoreResult<()>;
}

/// Command-side inbox of processed-message markers.
#[async_trait]
pub trait ConsumerEventCommandRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<ConsumerEvent>>;

    /// Insert the marker inside the consumer's business transaction.
    async fn add(&self, marker: &ConsumerEvent) -> StoreResult<()>;

    /// Retention cleanup; returns the number of markers removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// Query-side inbox of processed-message markers.
#[async_trait]
pub trait ConsumerEventQueryRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<ConsumerEvent>>;

    async fn add(&self, marker: &ConsumerEvent) -> StoreResult<()>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}
