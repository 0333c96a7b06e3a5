use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use courtside_booking::{WaitlistEntry, WaitlistRequest};
use uuid::Uuid;

use crate::auth::CurrentActor;
use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/waitlist", post(enqueue))
        .route("/v1/waitlist/{id}", delete(cancel))
}

/// POST /v1/waitlist
/// Queue for a slot that is currently taken.
async fn enqueue(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(req): Json<WaitlistRequest>,
) -> Result<(StatusCode, Json<WaitlistEntry>), AppError> {
    actor.ensure_acts_for(req.player_id)?;
    let entry = state.engine.enqueue_waitlist(req).await?;
    state.metrics.waitlist_enqueued.inc();
    Ok((StatusCode::CREATED, Json(entry)))
}

/// DELETE /v1/waitlist/{id}
async fn cancel(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<WaitlistEntry>, AppError> {
    let entry = state.engine.cancel_waitlist(&entry_id, actor.0)?;
    Ok(Json(entry))
}
