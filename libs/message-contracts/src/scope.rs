//! Per-delivery scope.
//!
//! Every delivery gets a fresh scope: two unit-of-work instances (command and
//! query side) and the inbox repository bound to each. The scope is built by
//! a [`ScopeFactory`] on entry and dropped on every exit path, which releases
//! the underlying connections.

use std::sync::Arc;

use async_trait::async_trait;

use crate::metadata::TransactionSide;
use crate::model::ConsumerEvent;
use crate::repository::{
    ConsumerEventCommandRepository, ConsumerEventQueryRepository, StoreResult, UnitOfWork,
};

pub struct ConsumerScope {
    pub command_uow: Arc<dyn UnitOfWork>,
    pub query_uow: Arc<dyn UnitOfWork>,
    pub command_inbox: Arc<dyn ConsumerEventCommandRepository>,
    pub query_inbox: Arc<dyn ConsumerEventQueryRepository>,
}

impl ConsumerScope {
    pub fn unit_of_work(&self, side: TransactionSide) -> &Arc<dyn UnitOfWork> {
        match side {
            TransactionSide::Command => &self.command_uow,
            TransactionSide::Query => &self.query_uow,
        }
    }

    pub async fn find_marker(
        &self,
        side: TransactionSide,
        id: &str,
    ) -> StoreResult<Option<ConsumerEvent>> {
        match side {
            TransactionSide::Command => self.command_inbox.find_by_id(id).await,
            TransactionSide::Query => self.query_inbox.find_by_id(id).await,
        }
    }

    pub async fn add_marker(
        &self,
        side: TransactionSide,
        marker: &ConsumerEvent,
    ) -> StoreResult<()> {
        match side {
            TransactionSide::Command => self.command_inbox.add(marker).await,
            TransactionSide::Query => self.query_inbox.add(marker).await,
        }
    }
}

#[async_trait]
pub trait ScopeFactory: Send + Sync {
    async fn create_scope(&self) -> anyhow::Result<ConsumerScope>;
}
