//! Queue subscriptions: retry topology, QoS, delivery decode and the
//! ack/nack translation of dispatch outcomes.

use std::sync::Arc;

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind as AmqpExchangeKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use message_contracts::{envelope, Event, InboundMessage, MessageDispatch};

use crate::{QueueBroker, QueueBrokerResult};

/// Delay before a dead-lettered message returns to its work queue.
const RETRY_DELAY_MS: u32 = 5_000;

/// How the consumed body maps to a dispatchable message.
#[derive(Clone)]
pub(crate) enum MessageShape {
    /// Body is an `Event` envelope; the inner type name and payload are
    /// lifted out of it.
    Envelope,
    /// Body is the bare payload of one declared message type.
    Typed(String),
}

/// Retry counter from the transport's requeue history: `x-death[0].count`.
pub fn death_count(headers: Option<&FieldTable>) -> u32 {
    headers
        .and_then(|table| table.inner().get("x-death"))
        .and_then(|value| match value {
            AMQPValue::FieldArray(array) => array.as_slice().first(),
            _ => None,
        })
        .and_then(|entry| match entry {
            AMQPValue::FieldTable(table) => table.inner().get("count"),
            _ => None,
        })
        .and_then(|count| match count {
            AMQPValue::LongLongInt(n) => Some(*n as u32),
            AMQPValue::LongInt(n) => Some(*n as u32),
            _ => None,
        })
        .unwrap_or(0)
}

/// Declare the work queue plus its retry loop: work queue dead-letters into
/// `{queue}.retry`, whose delay queue TTLs messages back onto the work queue
/// through the default exchange. Each round trip appends an `x-death` entry.
async fn declare_retry_topology(channel: &Channel, queue: &str) -> QueueBrokerResult<()> {
    let retry_exchange = format!("{queue}.retry");
    let durable_exchange = ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    };
    let durable_queue = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };

    channel
        .exchange_declare(
            &retry_exchange,
            AmqpExchangeKind::Fanout,
            durable_exchange,
            FieldTable::default(),
        )
        .await?;

    let mut retry_args = FieldTable::default();
    retry_args.insert("x-message-ttl".into(), AMQPValue::LongUInt(RETRY_DELAY_MS));
    retry_args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
    retry_args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(queue.into()),
    );
    channel
        .queue_declare(&retry_exchange, durable_queue, retry_args)
        .await?;
    channel
        .queue_bind(
            &retry_exchange,
            &retry_exchange,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut work_args = FieldTable::default();
    work_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(retry_exchange.as_str().into()),
    );
    channel
        .queue_declare(queue, durable_queue, work_args)
        .await?;

    Ok(())
}

pub(crate) async fn subscribe(
    broker: &QueueBroker,
    queue: &str,
    shape: MessageShape,
    dispatch: Arc<dyn MessageDispatch>,
    mut shutdown: watch::Receiver<()>,
) -> QueueBrokerResult<()> {
    let channel = broker.create_channel().await?;
    declare_retry_topology(&channel, queue).await?;

    if let Some(qos) = broker.qos_for(queue) {
        channel
            .basic_qos(qos.count, BasicQosOptions { global: qos.global })
            .await?;
        info!(queue = %queue, count = qos.count, global = qos.global, "queue QoS applied");
    }

    let consumer_tag = format!("{}-{}", queue, Uuid::new_v4().simple());
    let mut consumer = channel
        .basic_consume(
            queue,
            &consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let cooperative = broker.consuming_async();
    info!(queue = %queue, consumer_tag = %consumer_tag, cooperative, "queue consumer started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!(queue = %queue, "queue consumer stopping");
                break;
            }
            next = consumer.next() => match next {
                Some(Ok(delivery)) => {
                    if cooperative {
                        let dispatch = dispatch.clone();
                        let shape = shape.clone();
                        tokio::spawn(async move {
                            handle_delivery(dispatch, shape, delivery).await;
                        });
                    } else {
                        handle_delivery(dispatch.clone(), shape.clone(), delivery).await;
                    }
                }
                Some(Err(e)) => {
                    error!(queue = %queue, error = %e, "error consuming delivery");
                }
                None => {
                    warn!(queue = %queue, "consumer stream closed");
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn handle_delivery(dispatch: Arc<dyn MessageDispatch>, shape: MessageShape, delivery: Delivery) {
    let retry_count = death_count(delivery.properties.headers().as_ref());

    let (type_name, payload) = match &shape {
        MessageShape::Envelope => {
            match envelope::decode::<Event>(&String::from_utf8_lossy(&delivery.data)) {
                Ok(event) => (event.event_type, event.payload),
                Err(e) => {
                    // A body that cannot parse will never parse; drop it
                    // instead of cycling it through the retry topology.
                    warn!(error = %e, "undecodable event envelope, dropping delivery");
                    ack(delivery).await;
                    return;
                }
            }
        }
        MessageShape::Typed(type_name) => (
            type_name.clone(),
            String::from_utf8_lossy(&delivery.data).to_string(),
        ),
    };

    let outcome = dispatch
        .dispatch(InboundMessage {
            type_name,
            payload,
            retry_count,
        })
        .await;

    if outcome.is_ack() {
        ack(delivery).await;
    } else {
        // Send to the declared dead-letter exchange; the retry counter
        // advances in x-death on the way back.
        if let Err(e) = delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
        {
            error!(error = %e, "failed to nack delivery");
        }
    }
}

async fn ack(delivery: Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(error = %e, "failed to ack delivery");
    }
}
