use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use courtside_booking::AvailabilityGrid;
use courtside_core::{ClubId, SurfaceType};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub club_id: ClubId,
    pub date: NaiveDate,
    #[serde(default)]
    pub surface_type: Option<SurfaceType>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/courts", get(court_availability))
}

/// GET /v1/courts?club_id&date&surface_type
/// Slot grid for every active court of the club on that date.
async fn court_availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityGrid>, AppError> {
    let grid = state
        .engine
        .availability(query.club_id, query.date, query.surface_type)
        .await?;
    Ok(Json(grid))
}
