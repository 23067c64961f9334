//! # Messaging Contracts
//!
//! Shared contracts for the corebus messaging core: the data model for
//! outbox/inbox rows, the envelope codec, the consumer handler contract and
//! its static registry, publish-route declarations, and the persistence /
//! cache / dispatch seams the broker adapters and the dispatch engine are
//! built against.
//!
//! Everything here is transport-agnostic. The queue and stream adapters, the
//! outbox publisher and the dispatch engine all depend on this crate and on
//! nothing in each other, so a service wires them together through these
//! traits without the adapters ever interpreting business outcomes.
//!
//! ## Handler registration
//!
//! Handlers are registered explicitly at startup. There is no runtime type
//! scanning: the registry maps a wire type name to an erased invoker plus a
//! metadata record built fluently at registration time.
//!
//! ```rust,no_run
//! use message_contracts::{
//!     ConsumeMessage, HandlerMetadata, HandlerRegistry, IsolationLevel, TransactionSide,
//! };
//! use async_trait::async_trait;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct OrderPlaced {
//!     id: String,
//!     total: i64,
//! }
//!
//! struct OrderPlacedHandler;
//!
//! #[async_trait]
//! impl ConsumeMessage<OrderPlaced> for OrderPlacedHandler {
//!     async fn handle(&self, message: OrderPlaced) -> anyhow::Result<()> {
//!         // business logic
//!         let _ = (message.id, message.total);
//!         Ok(())
//!     }
//! }
//!
//! fn build_registry() -> anyhow::Result<HandlerRegistry> {
//!     let mut registry = HandlerRegistry::new();
//!     registry.register::<OrderPlaced, _>(
//!         "OrderPlaced",
//!         OrderPlacedHandler,
//!         HandlerMetadata::event()
//!             .max_retry(3)
//!             .transaction(TransactionSide::Command, IsolationLevel::ReadCommitted)
//!             .clean_cache("orders|orders:open"),
//!     )?;
//!     Ok(registry)
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod metadata;
pub mod model;
pub mod registry;
pub mod repository;
pub mod routes;
pub mod scope;

pub use cache::CacheStore;
pub use config::{MessagingConfig, QueueBrokerConfig, QueueQosConfig, StreamBrokerConfig};
pub use dispatch::{AckKind, DispatchOutcome, EventPublisher, InboundMessage, MessageDispatch};
pub use envelope::{decode, encode, extract_message_id, CodecError};
pub use metadata::{
    BindingKind, HandlerMetadata, IsolationLevel, TransactionConfig, TransactionSide,
};
pub use model::{ConsumerEvent, Event, EventState, ServiceStatus};
pub use registry::{ConsumeMessage, HandlerBinding, HandlerRegistry, RegistryError};
pub use repository::{
    ConsumerEventCommandRepository, ConsumerEventQueryRepository, EventCommandRepository,
    StoreError, StoreResult, UnitOfWork,
};
pub use routes::{EventRoute, ExchangeKind, RouteRegistry};
pub use scope::{ConsumerScope, ScopeFactory};
