//! SQLx outbox row repository (`events` table).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;

use message_contracts::{
    Event, EventCommandRepository, EventState, StoreError, StoreResult, UnitOfWork,
};

use crate::{db_err, SqlxUnitOfWork};

pub struct SqlxEventCommandRepository {
    uow: Arc<SqlxUnitOfWork>,
}

impl SqlxEventCommandRepository {
    pub fn new(uow: Arc<SqlxUnitOfWork>) -> Self {
        Self { uow }
    }
}

fn map_event(row: &sqlx::postgres::PgRow) -> Result<Event, sqlx::Error> {
    let is_active: bool = row.try_get("is_active")?;
    Ok(Event {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        state: if is_active {
            EventState::Active
        } else {
            EventState::Inactive
        },
        created_at: row.try_get("created_at")?,
        created_at_local: row.try_get("created_at_local")?,
        updated_at: row.try_get("updated_at")?,
        updated_at_local: row.try_get("updated_at_local")?,
    })
}

#[async_trait]
impl EventCommandRepository for SqlxEventCommandRepository {
    async fn add(&self, event: &Event) -> StoreResult<()> {
        let mut guard = self.uow.slot().lock().await;
        let tx = guard
            .as_mut()
            .ok_or(StoreError::NoActiveTransaction(self.uow.side()))?;

        sqlx::query(
            r#"
            INSERT INTO events (
                id, event_type, payload, is_active,
                created_at, created_at_local, updated_at, updated_at_local
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.state.is_active())
        .bind(event.created_at)
        .bind(&event.created_at_local)
        .bind(event.updated_at)
        .bind(&event.updated_at_local)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_all_ordered_by_date(&self) -> StoreResult<Vec<Event>> {
        let sql = r#"
            SELECT id, event_type, payload, is_active,
                   created_at, created_at_local, updated_at, updated_at_local
            FROM events
            ORDER BY created_at ASC
        "#;

        let mut guard = self.uow.slot().lock().await;
        let rows = match guard.as_mut() {
            Some(tx) => sqlx::query(sql).fetch_all(&mut **tx).await,
            None => sqlx::query(sql).fetch_all(self.uow.pool()).await,
        }
        .map_err(db_err)?;
        drop(guard);

        rows.iter()
            .map(map_event)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    async fn change(&self, event: &Event) -> StoreResult<()> {
        let mut guard = self.uow.slot().lock().await;
        let tx = guard
            .as_mut()
            .ok_or(StoreError::NoActiveTransaction(self.uow.side()))?;

        let result = sqlx::query(
            r#"
            UPDATE events
            SET is_active = $2, updated_at = $3, updated_at_local = $4
            WHERE id = $1
            "#,
        )
        .bind(&event.id)
        .bind(event.state.is_active())
        .bind(event.updated_at)
        .bind(&event.updated_at_local)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(event.id.clone()));
        }
        Ok(())
    }

    async fn remove(&self, event: &Event) -> StoreResult<()> {
        let mut guard = self.uow.slot().lock().await;
        let tx = guard
            .as_mut()
            .ok_or(StoreError::NoActiveTransaction(self.uow.side()))?;

        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(&event.id)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
