use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use courtside_booking::{
    Booking, BookingReceipt, BookingRequest, BookingStatus, CancelOutcome, Invitee, JoinOutcome,
};
use courtside_core::{CourtId, PaymentMethod, PlayerId, TimeRange};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::CurrentActor;
use crate::error::AppError;
use crate::state::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    #[serde(default)]
    pub court_id: Option<CourtId>,
    pub range: TimeRange,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub skill_level: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EquipmentReturnRequest {
    /// Rented items that came back damaged.
    #[serde(default)]
    pub damaged: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub payment_methods: HashMap<PlayerId, PaymentMethod>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route(
            "/v1/bookings/{id}",
            axum::routing::get(get_booking).patch(reschedule_booking),
        )
        .route("/v1/bookings/{id}/join", post(join_booking))
        .route("/v1/bookings/{id}/participants", post(add_participant))
        .route("/v1/bookings/{id}/pay", post(pay_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/equipment-return", post(return_equipment))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/bookings
/// Hold a slot; pays straight away when every payer sent a method.
async fn create_booking(
    State(state): State<AppState>,
    actor: CurrentActor,
    headers: HeaderMap,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<BookingReceipt>), AppError> {
    actor.ensure_acts_for(req.initiator)?;
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    state.metrics.bookings_requested.inc();
    let receipt = state
        .engine
        .request_booking(req, key)
        .await
        .inspect_err(|e| state.metrics.observe_error(e))?;

    if receipt.replayed {
        return Ok((StatusCode::OK, Json(receipt)));
    }
    if receipt.booking.status == BookingStatus::Confirmed {
        state.metrics.bookings_confirmed.inc();
    }
    if receipt.payment_error.is_some() {
        state.metrics.payment_failures.inc();
    }
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /v1/bookings/{id}
/// Visible to the booking's players and to staff.
async fn get_booking(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.engine.get_booking(&booking_id)?;
    if !actor.is_staff() && booking.participant(&actor.id()).is_none() {
        return Err(AppError::NotFoundError(format!("booking {}", booking_id)));
    }
    Ok(Json(booking))
}

/// PATCH /v1/bookings/{id}
/// Staff move a booking to another range or court.
async fn reschedule_booking(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .engine
        .reschedule(&booking_id, actor.0, req.court_id, req.range)
        .await
        .inspect_err(|e| state.metrics.observe_error(e))?;
    Ok(Json(booking))
}

/// POST /v1/bookings/{id}/join
async fn join_booking(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinOutcome>, AppError> {
    let outcome = state
        .engine
        .join_open_game(&booking_id, actor.id(), req.skill_level)
        .await?;
    Ok(Json(outcome))
}

/// POST /v1/bookings/{id}/participants
/// The initiator (or staff) invites a player.
async fn add_participant(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(booking_id): Path<Uuid>,
    Json(invitee): Json<Invitee>,
) -> Result<Json<JoinOutcome>, AppError> {
    let outcome = state.engine.add_participant(&booking_id, actor.0, invitee)?;
    Ok(Json(outcome))
}

/// POST /v1/bookings/{id}/pay
async fn pay_booking(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<PayRequest>,
) -> Result<Json<Booking>, AppError> {
    let current = state.engine.get_booking(&booking_id)?;
    if !actor.is_staff() && current.participant(&actor.id()).is_none() {
        return Err(AppError::AuthorizationError(
            "only the booking's players may pay".to_string(),
        ));
    }

    let booking = state
        .engine
        .submit_payment(booking_id, req.payment_methods)
        .await
        .inspect_err(|e| state.metrics.observe_error(e))?;
    state.metrics.bookings_confirmed.inc();
    Ok(Json(booking))
}

/// POST /v1/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<CancelOutcome>, AppError> {
    let outcome = state.engine.cancel(&booking_id, actor.0).await?;
    state.metrics.bookings_cancelled.inc();
    if outcome.booking.refund_pending {
        state.metrics.payment_failures.inc();
    }
    Ok(Json(outcome))
}

/// POST /v1/bookings/{id}/equipment-return
/// Staff check rented equipment back in.
async fn return_equipment(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<EquipmentReturnRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .engine
        .return_equipment(&booking_id, actor.0, &req.damaged)?;
    Ok(Json(booking))
}
