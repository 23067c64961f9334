//! Manual-commit consume loop with the processing gate and
//! retry-by-republish.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::ClientConfig;
use tokio::sync::watch;
use tracing::{error, info, warn};

use message_contracts::{InboundMessage, MessageDispatch, StreamBrokerConfig};

use crate::headers::{self, consumer_group, GROUP_ID_HEADER};
use crate::publisher::{apply_sasl, StreamPublisher};
use crate::{StreamBrokerError, StreamBrokerResult};

const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// One topic subscription for one service: consumer group
/// `{service}-{topic}`, earliest offset, manual commit.
pub struct StreamSubscription {
    consumer: StreamConsumer,
    publisher: Arc<StreamPublisher>,
    dispatch: Arc<dyn MessageDispatch>,
    topic: String,
    group: String,
}

impl StreamSubscription {
    pub fn new(
        config: &StreamBrokerConfig,
        service: &str,
        topic: &str,
        publisher: Arc<StreamPublisher>,
        dispatch: Arc<dyn MessageDispatch>,
    ) -> StreamBrokerResult<Self> {
        let group = consumer_group(service, topic);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false");
        apply_sasl(&mut client_config, config);

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        info!(topic = %topic, group = %group, "subscribed to stream topic");

        Ok(Self {
            consumer,
            publisher,
            dispatch,
            topic: topic.to_string(),
            group,
        })
    }

    /// Hot consume loop, gated by the shutdown signal. Failed deliveries are
    /// logged and left uncommitted so the broker redelivers them.
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) {
        info!(topic = %self.topic, group = %self.group, "stream consumer loop starting");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(topic = %self.topic, "stream consumer loop stopping");
                    break;
                }
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        if let Err(e) = self.handle(&message).await {
                            error!(
                                topic = %self.topic,
                                offset = message.offset(),
                                error = %e,
                                "delivery failed, offset left uncommitted"
                            );
                        }
                    }
                    Err(e) => {
                        error!(topic = %self.topic, error = %e, "stream recv error");
                        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }

    async fn handle(&self, message: &BorrowedMessage<'_>) -> StreamBrokerResult<()> {
        let group_id = headers::header_value(message, GROUP_ID_HEADER).unwrap_or_default();
        let retry_count = headers::retry_count(message);

        if !headers::passes_gate(&group_id, retry_count, &self.group) {
            // Another group's retry traffic; not for this generation.
            return self.commit(message);
        }

        let type_name = match message.key().map(String::from_utf8_lossy) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                warn!(topic = %self.topic, offset = message.offset(), "record without key, skipping");
                return self.commit(message);
            }
        };
        let payload = match message.payload().map(String::from_utf8_lossy) {
            Some(payload) => payload.to_string(),
            None => {
                warn!(topic = %self.topic, offset = message.offset(), "record without payload, skipping");
                return self.commit(message);
            }
        };

        let outcome = self
            .dispatch
            .dispatch(InboundMessage {
                type_name: type_name.clone(),
                payload: payload.clone(),
                retry_count,
            })
            .await;

        if outcome.is_ack() {
            return self.commit(message);
        }

        // Retry-by-republish: same payload, our group, incremented counter.
        // The original offset commits only if the republish succeeded.
        match self
            .publisher
            .publish_retry(
                &self.topic,
                &type_name,
                &payload,
                &self.group,
                retry_count + 1,
            )
            .await
        {
            Ok(()) => self.commit(message),
            Err(e) => Err(StreamBrokerError::RepublishFailed(Box::new(e))),
        }
    }

    fn commit(&self, message: &BorrowedMessage<'_>) -> StreamBrokerResult<()> {
        self.consumer
            .commit_message(message, CommitMode::Async)
            .map_err(StreamBrokerError::Kafka)
    }
}
