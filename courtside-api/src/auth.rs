use axum::{extract::FromRequestParts, http::request::Parts};
use courtside_booking::Actor;
use uuid::Uuid;

use crate::error::AppError;

/// Set by the upstream gateway after it has authenticated the caller.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// `player` (default) or `staff`.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The caller, as identified by the gateway headers.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

impl CurrentActor {
    pub fn id(&self) -> Uuid {
        match self.0 {
            Actor::Player(id) | Actor::Staff(id) => id,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.0.is_staff()
    }

    /// Players may only act for themselves; staff may act for anyone.
    pub fn ensure_acts_for(&self, player_id: Uuid) -> Result<(), AppError> {
        if self.is_staff() || self.id() == player_id {
            Ok(())
        } else {
            Err(AppError::AuthorizationError(format!(
                "cannot act on behalf of player {}",
                player_id
            )))
        }
    }
}

impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::AuthenticationError(format!("missing {} header", ACTOR_ID_HEADER)))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| AppError::AuthenticationError(format!("malformed {} header", ACTOR_ID_HEADER)))?;

        let role = parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("player");

        match role.to_ascii_lowercase().as_str() {
            "player" => Ok(Self(Actor::Player(id))),
            "staff" => Ok(Self(Actor::Staff(id))),
            other => Err(AppError::AuthenticationError(format!("unknown role {}", other))),
        }
    }
}
