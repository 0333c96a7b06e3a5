use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use courtside_booking::BookingError;
use prometheus::{IntCounter, Registry, TextEncoder};

use crate::state::AppState;

/// Booking counters, exported at `GET /metrics`.
pub struct Metrics {
    registry: Registry,
    pub bookings_requested: IntCounter,
    pub bookings_confirmed: IntCounter,
    pub bookings_cancelled: IntCounter,
    pub slot_conflicts: IntCounter,
    pub payment_failures: IntCounter,
    pub waitlist_enqueued: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("courtside".to_string()), None)?;
        Ok(Self {
            bookings_requested: counter(&registry, "bookings_requested_total", "Booking requests received")?,
            bookings_confirmed: counter(&registry, "bookings_confirmed_total", "Bookings confirmed")?,
            bookings_cancelled: counter(&registry, "bookings_cancelled_total", "Bookings cancelled")?,
            slot_conflicts: counter(&registry, "slot_conflicts_total", "Holds refused by an overlapping claim")?,
            payment_failures: counter(&registry, "payment_failures_total", "Failed authorizations, captures and refunds")?,
            waitlist_enqueued: counter(&registry, "waitlist_enqueued_total", "Waitlist entries created")?,
            registry,
        })
    }

    pub fn observe_error(&self, err: &BookingError) {
        match err {
            BookingError::SlotConflict { .. } => self.slot_conflicts.inc(),
            BookingError::PaymentDeclined { .. }
            | BookingError::PartialAuthorizationFailure { .. }
            | BookingError::Payment(_) => self.payment_failures.inc(),
            _ => {}
        }
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_conflicts_are_counted_and_rendered() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_error(&BookingError::SlotConflict {
            court_id: Uuid::new_v4(),
            range: courtside_core::TimeRange::starting_at(chrono::Utc::now(), chrono::Duration::hours(1)).unwrap(),
        });
        metrics.observe_error(&BookingError::Full);

        assert_eq!(metrics.slot_conflicts.get(), 1);
        assert_eq!(metrics.payment_failures.get(), 0);
        let text = metrics.render().unwrap();
        assert!(text.contains("courtside_slot_conflicts_total 1"));
    }
}
