//! The dispatch protocol between broker adapters and the dispatch engine.
//!
//! Adapters decode the wire delivery into an [`InboundMessage`], hand it to a
//! [`MessageDispatch`] implementation, and translate the typed outcome back
//! into transport verbs (ack / nack / republish-and-commit). They never
//! interpret business results themselves.

use async_trait::async_trait;

use crate::model::Event;
use crate::routes::EventRoute;

/// One decoded delivery, transport-agnostic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Wire type name; the binding key into the handler registry.
    pub type_name: String,
    /// Raw payload (UTF-8 JSON).
    pub payload: String,
    /// Retry counter read from transport headers (`x-death[0].count` on the
    /// queue side, `CountOfRetry` on the stream side).
    pub retry_count: u32,
}

/// Why a delivery was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// The handler committed and the delivery completed.
    Processed,
    /// No handler is registered for the type; it belongs to another service.
    UnknownType,
    /// The retry ceiling was exceeded; the message has been given up on.
    MaxRetryExceeded,
    /// The idempotency marker already exists; effects were applied earlier.
    AlreadyProcessed,
}

/// Outcome the transport must translate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ack(AckKind),
    /// Roll-back happened; route the delivery onto the transport's retry
    /// path (dead-letter on the queue side, republish on the stream side).
    Retry,
}

impl DispatchOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, DispatchOutcome::Ack(_))
    }
}

/// The consumer dispatch engine as seen by the broker adapters.
#[async_trait]
pub trait MessageDispatch: Send + Sync {
    async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome;
}

/// Outbound publishing seam used by the outbox publisher: hand an outbox row
/// to the wire according to its declared route.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_event(&self, route: &EventRoute, event: &Event) -> anyhow::Result<()>;
}
