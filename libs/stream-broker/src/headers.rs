//! Wire headers and the processing gate.

use rdkafka::message::{BorrowedMessage, Headers, Message};

pub const GROUP_ID_HEADER: &str = "GroupId";
pub const COUNT_OF_RETRY_HEADER: &str = "CountOfRetry";

/// Consumer-group name for a `(service, topic)` pair; doubles as the
/// `GroupId` header value stamped on retry republishes.
pub fn consumer_group(service: &str, topic: &str) -> String {
    format!("{service}-{topic}")
}

pub(crate) fn header_value(message: &BorrowedMessage<'_>, key: &str) -> Option<String> {
    message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == key)
            .and_then(|header| header.value)
            .map(|value| String::from_utf8_lossy(value).to_string())
    })
}

pub(crate) fn retry_count(message: &BorrowedMessage<'_>) -> u32 {
    header_value(message, COUNT_OF_RETRY_HEADER)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

/// A record is for this consumer iff it is a fresh publish (empty `GroupId`,
/// from any service) or this service's own retry republish (`GroupId` equals
/// our group and the counter is positive). Everything else belongs to some
/// other group's retry traffic and is silently committed.
pub(crate) fn passes_gate(group_id: &str, retry_count: u32, own_group: &str) -> bool {
    group_id.is_empty() || (group_id == own_group && retry_count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_publish_passes_for_every_group() {
        assert!(passes_gate("", 0, "orders-svc-orders"));
        assert!(passes_gate("", 0, "billing-svc-orders"));
    }

    #[test]
    fn own_retry_passes_only_with_positive_count() {
        assert!(passes_gate("orders-svc-orders", 1, "orders-svc-orders"));
        assert!(passes_gate("orders-svc-orders", 3, "orders-svc-orders"));
        assert!(!passes_gate("orders-svc-orders", 0, "orders-svc-orders"));
    }

    #[test]
    fn foreign_retry_is_rejected() {
        assert!(!passes_gate("billing-svc-orders", 2, "orders-svc-orders"));
    }

    #[test]
    fn group_name_concatenates_service_and_topic() {
        assert_eq!(consumer_group("orders-svc", "orders"), "orders-svc-orders");
    }
}
