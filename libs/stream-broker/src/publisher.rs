//! Keyed record publishing with bounded retry.

use std::time::Duration;

use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::{info, warn};

use message_contracts::StreamBrokerConfig;

use crate::headers::{COUNT_OF_RETRY_HEADER, GROUP_ID_HEADER};
use crate::{StreamBrokerError, StreamBrokerResult};

const PUBLISH_ATTEMPTS: u32 = 5;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(3);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Record publisher shared by the outbox path, the retry-republish path and
/// the central-log sink. One producer per process.
pub struct StreamPublisher {
    producer: FutureProducer,
}

impl StreamPublisher {
    pub fn new(config: &StreamBrokerConfig) -> StreamBrokerResult<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5");
        apply_sasl(&mut client_config, config);

        let producer = client_config.create()?;
        Ok(Self { producer })
    }

    /// Publish a fresh record: `GroupId` empty, counter zero. Every consumer
    /// group sees it.
    pub async fn publish_fresh(
        &self,
        topic: &str,
        type_name: &str,
        payload: &str,
    ) -> StreamBrokerResult<()> {
        self.publish(topic, type_name, payload, "", 0).await
    }

    /// Republish a failed record for retry, stamped with the owning consumer
    /// group and the incremented counter.
    pub async fn publish_retry(
        &self,
        topic: &str,
        type_name: &str,
        payload: &str,
        group: &str,
        retry_count: u32,
    ) -> StreamBrokerResult<()> {
        self.publish(topic, type_name, payload, group, retry_count)
            .await
    }

    async fn publish(
        &self,
        topic: &str,
        type_name: &str,
        payload: &str,
        group: &str,
        retry_count: u32,
    ) -> StreamBrokerResult<()> {
        let count = retry_count.to_string();
        let mut last_error = None;

        for attempt in 1..=PUBLISH_ATTEMPTS {
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: GROUP_ID_HEADER,
                    value: Some(group.as_bytes()),
                })
                .insert(Header {
                    key: COUNT_OF_RETRY_HEADER,
                    value: Some(count.as_bytes()),
                });
            let record = FutureRecord::to(topic)
                .key(type_name)
                .payload(payload)
                .headers(headers);

            match self.producer.send(record, DELIVERY_TIMEOUT).await {
                Ok(_) => {
                    info!(
                        topic = %topic,
                        type_name = %type_name,
                        retry_count,
                        "record published to stream"
                    );
                    return Ok(());
                }
                Err((error, _)) => {
                    warn!(
                        topic = %topic,
                        type_name = %type_name,
                        attempt,
                        error = %error,
                        "stream publish attempt failed"
                    );
                    last_error = Some(error);
                    if attempt < PUBLISH_ATTEMPTS {
                        tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(StreamBrokerError::PublishExhausted {
            topic: topic.to_string(),
            attempts: PUBLISH_ATTEMPTS,
            source: last_error.expect("at least one attempt was made"),
        })
    }
}

pub(crate) fn apply_sasl(client_config: &mut ClientConfig, config: &StreamBrokerConfig) {
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        client_config
            .set("security.protocol", "SASL_PLAINTEXT")
            .set("sasl.mechanism", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }
}
