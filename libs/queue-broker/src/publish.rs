//! Publishing across the three exchange modes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, ExchangeKind as AmqpExchangeKind};
use tracing::debug;

use message_contracts::{envelope, Event, EventPublisher, EventRoute, ExchangeKind};

use crate::{QueueBroker, QueueBrokerResult};

/// Where and how to publish one message on the queue broker.
#[derive(Debug, Clone)]
pub struct QueuePublication {
    pub exchange_kind: ExchangeKind,
    pub exchange: String,
    pub route: String,
    pub queue: String,
    pub headers: BTreeMap<String, String>,
}

impl QueuePublication {
    pub fn direct(exchange: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            exchange_kind: ExchangeKind::Direct,
            exchange: exchange.into(),
            route: route.into(),
            queue: String::new(),
            headers: BTreeMap::new(),
        }
    }

    pub fn fan_out(exchange: impl Into<String>) -> Self {
        Self {
            exchange_kind: ExchangeKind::FanOut,
            exchange: exchange.into(),
            route: String::new(),
            queue: String::new(),
            headers: BTreeMap::new(),
        }
    }

    pub fn default_to_queue(queue: impl Into<String>) -> Self {
        Self {
            exchange_kind: ExchangeKind::Default,
            exchange: String::new(),
            route: String::new(),
            queue: queue.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

fn to_field_table(headers: &BTreeMap<String, String>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(
            key.as_str().into(),
            AMQPValue::LongString(value.as_str().into()),
        );
    }
    table
}

impl QueueBroker {
    /// Publish a raw body according to the publication's exchange mode.
    /// Exchanges and queues are declared durable on the way (idempotent).
    pub async fn publish(
        &self,
        publication: &QueuePublication,
        body: &[u8],
    ) -> QueueBrokerResult<()> {
        let channel = self.publish_channel();
        let durable = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        let properties = BasicProperties::default()
            .with_headers(to_field_table(&publication.headers))
            .with_delivery_mode(2);

        let (exchange, routing_key) = match publication.exchange_kind {
            ExchangeKind::Direct => {
                channel
                    .exchange_declare(
                        &publication.exchange,
                        AmqpExchangeKind::Direct,
                        durable,
                        FieldTable::default(),
                    )
                    .await?;
                (publication.exchange.as_str(), publication.route.as_str())
            }
            ExchangeKind::FanOut => {
                channel
                    .exchange_declare(
                        &publication.exchange,
                        AmqpExchangeKind::Fanout,
                        durable,
                        FieldTable::default(),
                    )
                    .await?;
                (publication.exchange.as_str(), "")
            }
            ExchangeKind::Default => {
                channel
                    .queue_declare(
                        &publication.queue,
                        QueueDeclareOptions {
                            durable: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;
                ("", publication.queue.as_str())
            }
        };

        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;

        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            bytes = body.len(),
            "message published to queue broker"
        );
        Ok(())
    }
}

/// Outbox publishing: the `Event` envelope goes out on the event type's
/// declared exchange. Only `Direct` and `FanOut` are valid here; an outbox
/// row routed at the default exchange is a configuration error.
#[async_trait]
impl EventPublisher for QueueBroker {
    async fn publish_event(&self, route: &EventRoute, event: &Event) -> anyhow::Result<()> {
        let publication = match route.kind {
            ExchangeKind::Direct => QueuePublication::direct(&route.exchange, &route.route),
            ExchangeKind::FanOut => QueuePublication::fan_out(&route.exchange),
            ExchangeKind::Default => anyhow::bail!(
                "event type `{}` declares the default exchange, which is not valid for outbox publishing",
                event.event_type
            ),
        };

        let body = envelope::encode(event)?;
        self.publish(&publication, body.as_bytes()).await?;
        Ok(())
    }
}
