//! # Queue Broker Adapter
//!
//! Publish and subscribe over an AMQP broker (lapin). Three publish modes:
//! *Direct* (exchange + routing key), *FanOut* (exchange, key ignored) and
//! *Default* (no exchange, straight to a named queue).
//!
//! Consumed queues are declared together with a retry topology: the work
//! queue dead-letters into a `{queue}.retry` exchange whose delay queue TTLs
//! messages back onto the work queue. A delivery the dispatch engine refuses
//! is `nack`ed without requeue, takes that path, and comes back with its
//! `x-death[0].count` incremented — that count is the retry counter the
//! engine reads.
//!
//! Subscriptions run in one of two modes selected by configuration:
//! blocking-sequential (one in-flight delivery per subscription) or
//! cooperative-async (each delivery handled on its own task). Per-queue QoS
//! is applied from configuration before consumption starts.
//!
//! Malformed bodies that cannot be decoded are logged and acknowledged;
//! redelivering a payload that can never parse would loop through the retry
//! topology forever.

use std::sync::Arc;
use std::time::Duration;

use lapin::{Channel, Connection, ConnectionProperties};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use message_contracts::{MessageDispatch, MessagingConfig, QueueQosConfig};

mod consume;
mod publish;

pub use consume::death_count;
pub use publish::QueuePublication;

pub type QueueBrokerResult<T> = Result<T, QueueBrokerError>;

#[derive(Debug, Error)]
pub enum QueueBrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Bounded connect retry exhausted (5 attempts, fixed 3 s delay).
    #[error("broker connect failed after {attempts} attempts: {source}")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        source: lapin::Error,
    },
}

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// One broker connection per process, shared by all publishers and
/// subscriptions; channels are private per use.
pub struct QueueBroker {
    connection: Connection,
    publish_channel: Channel,
    qos: Vec<QueueQosConfig>,
    consuming_async: bool,
}

impl QueueBroker {
    /// Connect with the bounded fixed-delay retry policy.
    pub async fn connect(config: &MessagingConfig) -> QueueBrokerResult<Self> {
        let url = config.queue.amqp_url();
        let mut last_error = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            match Connection::connect(&url, ConnectionProperties::default()).await {
                Ok(connection) => {
                    info!(host = %config.queue.host, "connected to queue broker");
                    let publish_channel = connection.create_channel().await?;
                    return Ok(Self {
                        connection,
                        publish_channel,
                        qos: config.qos.clone(),
                        consuming_async: config.consuming_async,
                    });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "queue broker connect attempt failed");
                    last_error = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(QueueBrokerError::ConnectExhausted {
            attempts: CONNECT_ATTEMPTS,
            source: last_error.expect("at least one attempt was made"),
        })
    }

    pub(crate) fn publish_channel(&self) -> &Channel {
        &self.publish_channel
    }

    pub(crate) fn qos_for(&self, queue: &str) -> Option<&QueueQosConfig> {
        self.qos.iter().find(|q| q.active && q.queue == queue)
    }

    pub(crate) fn consuming_async(&self) -> bool {
        self.consuming_async
    }

    pub(crate) async fn create_channel(&self) -> QueueBrokerResult<Channel> {
        Ok(self.connection.create_channel().await?)
    }

    /// Consume a queue carrying `Event` envelopes.
    pub async fn subscribe_event(
        &self,
        queue: &str,
        dispatch: Arc<dyn MessageDispatch>,
        shutdown: watch::Receiver<()>,
    ) -> QueueBrokerResult<()> {
        consume::subscribe(self, queue, consume::MessageShape::Envelope, dispatch, shutdown).await
    }

    /// Consume a queue carrying bare payloads of one declared message type.
    pub async fn subscribe_message(
        &self,
        queue: &str,
        type_name: &str,
        dispatch: Arc<dyn MessageDispatch>,
        shutdown: watch::Receiver<()>,
    ) -> QueueBrokerResult<()> {
        consume::subscribe(
            self,
            queue,
            consume::MessageShape::Typed(type_name.to_string()),
            dispatch,
            shutdown,
        )
        .await
    }
}
