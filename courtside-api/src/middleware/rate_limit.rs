use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use courtside_store::redis_repo::rate_limit_key;
use serde_json::json;
use std::net::SocketAddr;

use crate::state::AppState;

/// Per-client-IP request budget per minute, kept in Redis. Requests pass
/// when Redis is not configured or not reachable.
pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(redis) = state.redis.as_ref() else {
        return next.run(req).await;
    };
    let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>().cloned() else {
        return next.run(req).await;
    };

    let key = rate_limit_key(&addr.ip().to_string());
    match redis.check_rate_limit(&key, state.rate_limit_per_minute, 60).await {
        Ok(true) => next.run(req).await,
        Ok(false) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Rate limit exceeded", "code": "RATE_LIMITED" })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "rate limiter unavailable, failing open");
            next.run(req).await
        }
    }
}
