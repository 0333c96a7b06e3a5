use axum::{
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Processor failing, fail fast
    HalfOpen, // Probing whether it is back
}

pub struct CircuitBreaker {
    pub name: String,
    pub state: RwLock<CircuitState>,
    pub failure_count: AtomicUsize,
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
    pub last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold,
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> CircuitState {
        *self.state.read().await
    }

    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        if state == CircuitState::Closed {
            return true;
        }

        if state == CircuitState::Open {
            let last_fail = *self.last_failure.read().await;
            if let Some(instant) = last_fail {
                if instant.elapsed() >= self.reset_timeout {
                    let mut s = self.state.write().await;
                    *s = CircuitState::HalfOpen;
                    tracing::info!(circuit = %self.name, "circuit half-open");
                    return true;
                }
            }
            return false;
        }

        // Half-open lets trial requests through
        true
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            self.failure_count.store(0, Ordering::SeqCst);
            tracing::info!(circuit = %self.name, "circuit recovered");
        } else if *state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::SeqCst);
        }
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            let mut last = self.last_failure.write().await;
            *last = Some(Instant::now());
            tracing::error!(circuit = %self.name, failures = count, "circuit tripped open");
        }
    }
}

/// Breakers for calls that reach the payment processor.
pub struct ResiliencyState {
    pub payment_cb: CircuitBreaker,
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self {
            payment_cb: CircuitBreaker::new("payments", 5, Duration::from_secs(30)),
        }
    }
}

/// Booking creation may pay inline; `/pay` always does.
fn touches_payments(method: &Method, path: &str) -> bool {
    *method == Method::POST && (path == "/v1/bookings" || path.ends_with("/pay"))
}

pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> impl IntoResponse {
    if !touches_payments(req.method(), req.uri().path()) {
        return next.run(req).await.into_response();
    }

    let cb = &state.resiliency.payment_cb;
    if !cb.check().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": format!("circuit {} is open", cb.name),
                "code": "CIRCUIT_OPEN",
            })),
        )
            .into_response();
    }

    let response = next.run(req).await;

    if response.status().is_server_error() {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }

    response.into_response()
}
