//! SQLx inbox marker repositories.
//!
//! Two parallel tables, one per side, each bound to its own unit of work.
//! Presence of an id means the handler for that message has already
//! committed; the unique primary key is what makes the marker a durable
//! idempotency gate under concurrent redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use message_contracts::{
    ConsumerEvent, ConsumerEventCommandRepository, ConsumerEventQueryRepository, StoreError,
    StoreResult, UnitOfWork,
};

use crate::{db_err, SqlxUnitOfWork};

struct SqlxInbox {
    uow: Arc<SqlxUnitOfWork>,
    table: &'static str,
}

fn map_marker(row: &sqlx::postgres::PgRow) -> Result<ConsumerEvent, sqlx::Error> {
    Ok(ConsumerEvent {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
    })
}

impl SqlxInbox {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<ConsumerEvent>> {
        let sql = format!(
            "SELECT id, event_type, retry_count, created_at FROM {} WHERE id = $1",
            self.table
        );

        let mut guard = self.uow.slot().lock().await;
        let row = match guard.as_mut() {
            Some(tx) => sqlx::query(&sql).bind(id).fetch_optional(&mut **tx).await,
            None => sqlx::query(&sql).bind(id).fetch_optional(self.uow.pool()).await,
        }
        .map_err(db_err)?;
        drop(guard);

        row.as_ref().map(map_marker).transpose().map_err(db_err)
    }

    async fn add(&self, marker: &ConsumerEvent) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, event_type, retry_count, created_at) VALUES ($1, $2, $3, $4)",
            self.table
        );

        let mut guard = self.uow.slot().lock().await;
        let tx = guard
            .as_mut()
            .ok_or(StoreError::NoActiveTransaction(self.uow.side()))?;

        sqlx::query(&sql)
            .bind(&marker.id)
            .bind(&marker.event_type)
            .bind(marker.retry_count)
            .bind(marker.created_at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let sql = format!("DELETE FROM {} WHERE created_at < $1", self.table);
        let result = sqlx::query(&sql)
            .bind(cutoff)
            .execute(self.uow.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

pub struct SqlxConsumerEventCommandRepository {
    inner: SqlxInbox,
}

impl SqlxConsumerEventCommandRepository {
    pub fn new(uow: Arc<SqlxUnitOfWork>) -> Self {
        Self {
            inner: SqlxInbox {
                uow,
                table: "consumer_events",
            },
        }
    }
}

#[async_trait]
impl ConsumerEventCommandRepository for SqlxConsumerEventCommandRepository {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<ConsumerEvent>> {
        self.inner.find_by_id(id).await
    }

    async fn add(&self, marker: &ConsumerEvent) -> StoreResult<()> {
        self.inner.add(marker).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.delete_older_than(cutoff).await
    }
}

pub struct SqlxConsumerEventQueryRepository {
    inner: SqlxInbox,
}

impl SqlxConsumerEventQueryRepository {
    pub fn new(uow: Arc<SqlxUnitOfWork>) -> Self {
        Self {
            inner: SqlxInbox {
                uow,
                table: "consumer_events_query",
            },
        }
    }
}

#[async_trait]
impl ConsumerEventQueryRepository for SqlxConsumerEventQueryRepository {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<ConsumerEvent>> {
        self.inner.find_by_id(id).await
    }

    async fn add(&self, marker: &ConsumerEvent) -> StoreResult<()> {
        self.inner.add(marker).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.delete_older_than(cutoff).await
    }
}
