//! # Stream Broker Adapter
//!
//! Publish and subscribe over a partitioned event-stream broker (Kafka via
//! `rdkafka`). Records carry the message type name as the key, the UTF-8
//! JSON payload as the value, and two required headers:
//!
//! - `GroupId`: empty on a fresh publish; `{service}-{topic}` on a retry
//!   republish, marking which consumer group owns the retry.
//! - `CountOfRetry`: ASCII integer retry counter.
//!
//! Consumption uses a per-`(service, topic)` consumer group with manual
//! commit. Before dispatch, the processing gate admits a record only if it
//! is a fresh publish or this service's own retry republish; everything else
//! is silently committed. When dispatch asks for a retry, the adapter
//! republishes the same payload with an incremented counter and commits the
//! original offset only if the republish succeeded — a failed republish
//! leaves the offset alone so the record redelivers.
//!
//! Known trade-off: once a republish succeeds the original offset commits,
//! so the retry copy is the only remaining carrier of the event. If broker
//! retention drops it before it is consumed, the event is lost. This is the
//! designed behavior, not a bug.

use thiserror::Error;

mod headers;
mod publisher;
mod subscription;

pub use headers::{consumer_group, COUNT_OF_RETRY_HEADER, GROUP_ID_HEADER};
pub use publisher::StreamPublisher;
pub use subscription::StreamSubscription;

pub type StreamBrokerResult<T> = Result<T, StreamBrokerError>;

#[derive(Debug, Error)]
pub enum StreamBrokerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Bounded publish retry exhausted (5 attempts, fixed 3 s delay).
    #[error("publish to `{topic}` failed after {attempts} attempts: {source}")]
    PublishExhausted {
        topic: String,
        attempts: u32,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    #[error("republish for retry failed, offset left uncommitted: {0}")]
    RepublishFailed(#[source] Box<StreamBrokerError>),
}
