//! Durable rows owned by the messaging core: the outbox `Event`, the inbox
//! `ConsumerEvent` marker, and the startup `ServiceStatus` announcement.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{self, CodecError};

/// Outbox row lifecycle state.
///
/// A row moves from `Active` to `Inactive` exactly once, when the publisher
/// has handed it to the broker; an `Inactive` row is eligible for removal on
/// the next pass. The reverse transition does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventState {
    Active,
    Inactive,
}

impl EventState {
    pub fn is_active(self) -> bool {
        matches!(self, EventState::Active)
    }
}

/// Outbox row: a domain event captured in the same database transaction as
/// the state change it describes, waiting to be drained to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique event id.
    pub id: String,
    /// Logical event name; the binding key into the handler and route
    /// registries on both ends of the wire.
    pub event_type: String,
    /// Serialized payload (UTF-8 JSON).
    pub payload: String,
    pub state: EventState,
    pub created_at: DateTime<Utc>,
    /// Localized rendering of `created_at` for operator-facing views.
    pub created_at_local: String,
    pub updated_at: DateTime<Utc>,
    pub updated_at_local: String,
}

impl Event {
    /// Capture a new `Active` outbox row for `payload`.
    pub fn new<T: Serialize>(event_type: impl Into<String>, payload: &T) -> Result<Self, CodecError> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload: envelope::encode(payload)?,
            state: EventState::Active,
            created_at: now,
            created_at_local: local_stamp(now),
            updated_at: now,
            updated_at_local: local_stamp(now),
        })
    }

    /// Transition `Active` -> `Inactive` and touch the update timestamps.
    /// Calling this on an already-inactive row is a no-op.
    pub fn deactivate(&mut self) {
        if self.state.is_active() {
            self.state = EventState::Inactive;
            let now = Utc::now();
            self.updated_at = now;
            self.updated_at_local = local_stamp(now);
        }
    }
}

/// Inbox marker: proof that the handler for message `id` has committed
/// successfully at least once. Inserted inside the consumer's business
/// transaction, so either both the side-effects and the marker commit or
/// neither does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerEvent {
    /// Equal to the inbound message's id.
    pub id: String,
    pub event_type: String,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

impl ConsumerEvent {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, retry_count: i32) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            retry_count,
            created_at: Utc::now(),
        }
    }
}

/// Announcement record a service publishes once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub id: String,
    pub name: String,
    pub host: String,
    pub ip_address: String,
    pub port: u16,
    pub status: String,
}

fn local_stamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        id: String,
    }

    #[test]
    fn new_event_starts_active() {
        let event = Event::new("SampleHappened", &Sample { id: "s1".into() }).unwrap();
        assert!(event.state.is_active());
        assert!(!event.id.is_empty());
        assert!(event.payload.contains("s1"));
    }

    #[test]
    fn deactivate_is_one_way() {
        let mut event = Event::new("SampleHappened", &Sample { id: "s1".into() }).unwrap();
        let created = event.updated_at;
        event.deactivate();
        assert_eq!(event.state, EventState::Inactive);
        assert!(event.updated_at >= created);

        let touched = event.updated_at;
        event.deactivate();
        assert_eq!(event.state, EventState::Inactive);
        assert_eq!(event.updated_at, touched);
    }
}
