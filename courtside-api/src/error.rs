use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courtside_booking::{BookingError, WaitlistError};
use courtside_catalog::EquipmentError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, "NOT_AUTHORIZED", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Anyhow(err) => match err.downcast::<BookingError>() {
                Ok(booking_err) => {
                    let status = status_for(&booking_err);
                    if status.is_server_error() {
                        tracing::error!(error = %booking_err, "booking operation failed");
                    }
                    (status, booking_err.code(), booking_err.to_string())
                }
                Err(err) => {
                    tracing::error!("Internal Server Error: {:#}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal Server Error".to_string(),
                    )
                }
            },
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}

/// HTTP status for an engine error. Recoverable conflicts are 409, payment
/// refusals 402, processor trouble 502.
pub fn status_for(err: &BookingError) -> StatusCode {
    match err {
        BookingError::SlotConflict { .. }
        | BookingError::Full
        | BookingError::AlreadyJoined
        | BookingError::ClosedOrAlreadyConfirmed
        | BookingError::NotCancellable(_)
        | BookingError::NotReady(_)
        | BookingError::PaymentInProgress
        | BookingError::LimitReached(_)
        | BookingError::InvalidState(_) => StatusCode::CONFLICT,
        BookingError::NotOpen | BookingError::NotAuthorized(_) => StatusCode::FORBIDDEN,
        BookingError::PaymentDeclined { .. } | BookingError::PartialAuthorizationFailure { .. } => {
            StatusCode::PAYMENT_REQUIRED
        }
        BookingError::HoldExpired(_) => StatusCode::GONE,
        BookingError::NotFound(_) => StatusCode::NOT_FOUND,
        BookingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        BookingError::Payment(_) => StatusCode::BAD_GATEWAY,
        BookingError::Waitlist(WaitlistError::NotFound(_)) => StatusCode::NOT_FOUND,
        BookingError::Waitlist(_) => StatusCode::CONFLICT,
        BookingError::Equipment(EquipmentError::NotFound(_)) => StatusCode::NOT_FOUND,
        BookingError::Equipment(_) => StatusCode::CONFLICT,
        BookingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
