use courtside_catalog::{EquipmentError, PricingError};
use courtside_core::{BookingId, CoreError, CourtId, PlayerId, TimeRange};

use crate::ledger::LedgerError;
use crate::models::BookingStatus;
use crate::split::PaymentError;
use crate::waitlist::WaitlistError;

/// Errors surfaced by booking operations.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Slot conflict on court {court_id} for {range}")]
    SlotConflict { court_id: CourtId, range: TimeRange },

    #[error("Booking is full")]
    Full,

    #[error("Player already joined this booking")]
    AlreadyJoined,

    #[error("Booking is invite-only")]
    NotOpen,

    #[error("Booking is closed or already confirmed")]
    ClosedOrAlreadyConfirmed,

    #[error("Payment declined for player {player_id}: {reason}")]
    PaymentDeclined { player_id: PlayerId, reason: String },

    #[error("Payment declined for player {player_id} after other shares were authorized ({voided} voided): {reason}")]
    PartialAuthorizationFailure {
        player_id: PlayerId,
        reason: String,
        voided: usize,
    },

    #[error("Booking in status {0} cannot be cancelled")]
    NotCancellable(BookingStatus),

    #[error("Hold expired for booking {0}")]
    HoldExpired(BookingId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Booking is not ready for payment: {0}")]
    NotReady(String),

    #[error("A payment is already in progress for this booking")]
    PaymentInProgress,

    #[error("Operation not allowed in status {0}")]
    InvalidState(BookingStatus),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Booking limit reached: {0}")]
    LimitReached(String),

    #[error("Payment failed: {0}")]
    Payment(String),

    #[error(transparent)]
    Waitlist(#[from] WaitlistError),

    #[error(transparent)]
    Equipment(#[from] EquipmentError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type BookingResult<T> = Result<T, BookingError>;

impl BookingError {
    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::SlotConflict { .. } => "SLOT_CONFLICT",
            BookingError::Full => "FULL",
            BookingError::AlreadyJoined => "ALREADY_JOINED",
            BookingError::NotOpen => "NOT_OPEN",
            BookingError::ClosedOrAlreadyConfirmed => "CLOSED_OR_ALREADY_CONFIRMED",
            BookingError::PaymentDeclined { .. } => "PAYMENT_DECLINED",
            BookingError::PartialAuthorizationFailure { .. } => "PARTIAL_AUTHORIZATION_FAILURE",
            BookingError::NotCancellable(_) => "NOT_CANCELLABLE",
            BookingError::HoldExpired(_) => "HOLD_EXPIRED",
            BookingError::NotFound(_) => "NOT_FOUND",
            BookingError::NotAuthorized(_) => "NOT_AUTHORIZED",
            BookingError::NotReady(_) => "NOT_READY",
            BookingError::PaymentInProgress => "PAYMENT_IN_PROGRESS",
            BookingError::InvalidState(_) => "INVALID_STATE",
            BookingError::InvalidRequest(_) => "INVALID_REQUEST",
            BookingError::LimitReached(_) => "LIMIT_REACHED",
            BookingError::Payment(_) => "PAYMENT_FAILED",
            BookingError::Waitlist(WaitlistError::NotFound(_)) => "NOT_FOUND",
            BookingError::Waitlist(_) => "WAITLIST_ERROR",
            BookingError::Equipment(EquipmentError::NotFound(_)) => "NOT_FOUND",
            BookingError::Equipment(_) => "EQUIPMENT_UNAVAILABLE",
            BookingError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<LedgerError> for BookingError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::SlotConflict { court_id, range } => BookingError::SlotConflict { court_id, range },
            LedgerError::HoldExpired(booking_id) => BookingError::HoldExpired(booking_id),
            LedgerError::InvalidRange(range) => {
                BookingError::InvalidRequest(format!("time range {} ends before it starts", range))
            }
        }
    }
}

impl From<PaymentError> for BookingError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Declined { player_id, reason } => BookingError::PaymentDeclined { player_id, reason },
            PaymentError::PartialFailure {
                player_id,
                reason,
                voided,
            } => BookingError::PartialAuthorizationFailure {
                player_id,
                reason,
                voided,
            },
            PaymentError::MissingMethod(player_id) => {
                BookingError::InvalidRequest(format!("no payment method for player {}", player_id))
            }
            PaymentError::InvalidSplit(msg) => BookingError::InvalidRequest(msg),
            other => BookingError::Payment(other.to_string()),
        }
    }
}

impl From<CoreError> for BookingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => BookingError::InvalidRequest(msg),
            CoreError::CourtNotFound(id) => BookingError::NotFound(format!("court {}", id)),
            CoreError::InternalError(msg) => BookingError::Internal(msg),
        }
    }
}

impl From<PricingError> for BookingError {
    fn from(err: PricingError) -> Self {
        BookingError::Internal(err.to_string())
    }
}
