//! Per-delivery scope factory.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use message_contracts::{ConsumerScope, ScopeFactory, TransactionSide};

use crate::{
    SqlxConsumerEventCommandRepository, SqlxConsumerEventQueryRepository, SqlxUnitOfWork,
};

/// Builds a fresh scope per delivery: two new unit-of-work instances over the
/// shared pools and the inbox repository bound to each. Dropping the scope
/// rolls back anything left open by returning the pooled connections.
pub struct SqlxScopeFactory {
    command_pool: PgPool,
    query_pool: PgPool,
}

impl SqlxScopeFactory {
    pub fn new(command_pool: PgPool, query_pool: PgPool) -> Self {
        Self {
            command_pool,
            query_pool,
        }
    }
}

#[async_trait]
impl ScopeFactory for SqlxScopeFactory {
    async fn create_scope(&self) -> anyhow::Result<ConsumerScope> {
        let command_uow = Arc::new(SqlxUnitOfWork::new(
            self.command_pool.clone(),
            TransactionSide::Command,
        ));
        let query_uow = Arc::new(SqlxUnitOfWork::new(
            self.query_pool.clone(),
            TransactionSide::Query,
        ));

        Ok(ConsumerScope {
            command_inbox: Arc::new(SqlxConsumerEventCommandRepository::new(command_uow.clone())),
            query_inbox: Arc::new(SqlxConsumerEventQueryRepository::new(query_uow.clone())),
            command_uow,
            query_uow,
        })
    }
}
