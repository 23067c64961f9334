//! SQLx unit-of-work.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use message_contracts::{IsolationLevel, StoreError, StoreResult, TransactionSide, UnitOfWork};

use crate::db_err;

/// One transaction boundary over a PostgreSQL pool, tagged with its side.
///
/// Repositories created from the same unit of work execute inside its active
/// transaction. A fresh instance is created per delivery scope; the outbox
/// publisher reuses one across passes (begin/commit per pass).
pub struct SqlxUnitOfWork {
    pool: PgPool,
    side: TransactionSide,
    active: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl SqlxUnitOfWork {
    pub fn new(pool: PgPool, side: TransactionSide) -> Self {
        Self {
            pool,
            side,
            active: Mutex::new(None),
        }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn slot(&self) -> &Mutex<Option<Transaction<'static, Postgres>>> {
        &self.active
    }
}

#[async_trait]
impl UnitOfWork for SqlxUnitOfWork {
    fn side(&self) -> TransactionSide {
        self.side
    }

    async fn begin(&self, isolation: IsolationLevel) -> StoreResult<()> {
        let mut guard = self.active.lock().await;
        if guard.is_some() {
            return Err(StoreError::TransactionAlreadyActive(self.side));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            isolation.as_sql()
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        debug!(side = ?self.side, isolation = isolation.as_sql(), "transaction opened");
        *guard = Some(tx);
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        let tx = self
            .active
            .lock()
            .await
            .take()
            .ok_or(StoreError::NoActiveTransaction(self.side))?;
        tx.commit().await.map_err(db_err)?;
        debug!(side = ?self.side, "transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        match self.active.lock().await.take() {
            Some(tx) => {
                tx.rollback().await.map_err(db_err)?;
                debug!(side = ?self.side, "transaction rolled back");
                Ok(())
            }
            // Idempotent by contract, so error paths roll back unconditionally.
            None => Ok(()),
        }
    }
}
