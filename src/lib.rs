//! Corebus: the asynchronous messaging core of a microservice stack.
//!
//! Reliable, effectively-exactly-once event and message delivery over two
//! interchangeable transports: a transactional outbox drained to the broker
//! under cluster-wide locks on the producer side, and a consumer dispatch
//! protocol with durable idempotency markers, bounded dead-letter retries
//! and cache invalidation on the consumer side.
//!
//! This crate is a facade over the workspace libraries; services depend on
//! the individual crates or on this re-export, whichever reads better.

pub use consumer_dispatch;
pub use failure_log;
pub use hosted_workers;
pub use message_contracts;
pub use message_store;
pub use outbox_publisher;
pub use queue_broker;
pub use redis_cache;
pub use stream_broker;
