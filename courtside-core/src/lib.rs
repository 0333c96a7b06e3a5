pub mod clock;
pub mod court;
pub mod payment;
pub mod repository;
pub mod time;

pub use clock::{Clock, ManualClock, SystemClock};
pub use court::{Court, CourtBlackout, DayHours, OperatingHours, SurfaceType};
pub use payment::{MockPaymentProcessor, PaymentMethod, PaymentProcessor, ProcessorError, ProcessorToken};
pub use repository::{CourtDirectory, InMemoryCourtDirectory};
pub use time::{SlotKey, TimeRange};

pub type BookingId = uuid::Uuid;
pub type CourtId = uuid::Uuid;
pub type ClubId = uuid::Uuid;
pub type PlayerId = uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Court not found: {0}")]
    CourtNotFound(CourtId),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
