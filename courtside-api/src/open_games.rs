use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use courtside_booking::{Booking, OpenGameFilter};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/open-games", get(list_open_games))
}

/// GET /v1/open-games?club_id&date&skill_level
async fn list_open_games(
    State(state): State<AppState>,
    Query(filter): Query<OpenGameFilter>,
) -> Json<Vec<Booking>> {
    Json(state.engine.list_open_games(&filter).collect())
}
