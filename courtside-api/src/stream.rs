use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Only events of this booking.
    #[serde(default)]
    pub booking_id: Option<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/events", get(event_stream))
}

/// GET /v1/events?booking_id
/// Live domain events as server-sent events. Subscribers that fall behind
/// skip what they missed.
async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.live_events.subscribe();
    let wanted = query.booking_id;

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        let event = result.ok()?;
        if wanted.is_some() && event.booking_id != wanted {
            return None;
        }
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok::<_, Infallible>(Event::default()
            .event(event.event_type.topic())
            .id(event.event_id.to_string())
            .data(data)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
