use axum::{
    http::{HeaderName, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod bookings;
pub mod courts;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod open_games;
pub mod state;
pub mod stream;
pub mod waitlist;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
            HeaderName::from_static(auth::ACTOR_ID_HEADER),
            HeaderName::from_static(auth::ACTOR_ROLE_HEADER),
            HeaderName::from_static(bookings::IDEMPOTENCY_KEY_HEADER),
        ]);

    Router::new()
        .merge(courts::routes())
        .merge(bookings::routes())
        .merge(open_games::routes())
        .merge(waitlist::routes())
        .merge(stream::routes())
        .route("/metrics", get(metrics::metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::circuit_breaker_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
