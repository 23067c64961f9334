//! # Message Store
//!
//! PostgreSQL-backed implementations of the messaging core's persistence
//! contracts: the command/query unit-of-work, the outbox row repository, the
//! two inbox marker repositories, and the per-delivery scope factory.
//!
//! Writes that must be atomic with business effects (outbox insert, inbox
//! marker insert, outbox state transitions) refuse to run without an open
//! transaction on their unit of work; reads fall back to the pool when no
//! transaction is active.
//!
//! The [`memory`] module carries in-memory counterparts with real
//! stage-on-write / apply-on-commit semantics so the scenario suite can
//! observe commit/rollback atomicity without a database.
//!
//! ## Database setup
//!
//! ```bash
//! sqlx database create --database-url $DATABASE_URL
//! sqlx migrate run --source libs/message-store/migrations
//! ```

use message_contracts::StoreError;

mod inbox;
pub mod memory;
mod outbox;
mod scope;
mod uow;

pub use inbox::{SqlxConsumerEventCommandRepository, SqlxConsumerEventQueryRepository};
pub use outbox::SqlxEventCommandRepository;
pub use scope::SqlxScopeFactory;
pub use uow::SqlxUnitOfWork;

pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(anyhow::Error::new(e))
}
