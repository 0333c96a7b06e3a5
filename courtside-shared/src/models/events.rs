use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topics consumed by the notification dispatcher and reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "booking.created")]
    BookingCreated,
    #[serde(rename = "booking.confirmed")]
    BookingConfirmed,
    #[serde(rename = "booking.expired")]
    BookingExpired,
    #[serde(rename = "booking.cancelled")]
    BookingCancelled,
    #[serde(rename = "booking.completed")]
    BookingCompleted,
    #[serde(rename = "waitlist.promoted")]
    WaitlistPromoted,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
}

impl EventType {
    pub fn topic(&self) -> &'static str {
        match self {
            EventType::BookingCreated => "booking.created",
            EventType::BookingConfirmed => "booking.confirmed",
            EventType::BookingExpired => "booking.expired",
            EventType::BookingCancelled => "booking.cancelled",
            EventType::BookingCompleted => "booking.completed",
            EventType::WaitlistPromoted => "waitlist.promoted",
            EventType::PaymentFailed => "payment.failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.topic())
    }
}

/// Envelope for every event leaving the engine.
///
/// Delivery is at-least-once; consumers deduplicate on `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub booking_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(
        event_type: EventType,
        booking_id: Option<Uuid>,
        occurred_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            booking_id,
            occurred_at,
            payload,
        }
    }

    /// Partition key: events of one booking stay ordered on the same partition.
    pub fn partition_key(&self) -> String {
        self.booking_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| self.event_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serializes_as_topic() {
        let json = serde_json::to_string(&EventType::WaitlistPromoted).unwrap();
        assert_eq!(json, "\"waitlist.promoted\"");
        assert_eq!(EventType::PaymentFailed.to_string(), "payment.failed");
    }

    #[test]
    fn test_partition_key_prefers_booking() {
        let booking_id = Uuid::new_v4();
        let event = DomainEvent::new(
            EventType::BookingConfirmed,
            Some(booking_id),
            Utc::now(),
            serde_json::json!({}),
        );
        assert_eq!(event.partition_key(), booking_id.to_string());

        let orphan = DomainEvent::new(EventType::WaitlistPromoted, None, Utc::now(), serde_json::json!({}));
        assert_eq!(orphan.partition_key(), orphan.event_id.to_string());
    }
}
