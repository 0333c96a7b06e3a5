pub mod availability;
pub mod config;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod ledger;
pub mod manager;
pub mod matchmaking;
pub mod models;
pub mod orchestrator;
pub mod refund;
pub mod split;
pub mod waitlist;

pub use availability::{AvailabilityGrid, CourtAvailability, SlotAvailability};
pub use config::EngineConfig;
pub use error::{BookingError, BookingResult};
pub use events::{BroadcastSink, EventSink, FanoutSink, RecordingSink};
pub use ledger::{HoldToken, LedgerError, SlotLedger};
pub use manager::BookingStore;
pub use matchmaking::{OpenGameFilter, OpenGameRegistry, OpenGames};
pub use models::{
    Actor, Booking, BookingMode, BookingStatus, JoinOutcome, Participant, ParticipantPaymentStatus,
    PaymentAuthorization, AuthorizationStatus, SkillWarning,
};
pub use orchestrator::{
    BookingOrchestrator, BookingReceipt, BookingRequest, CancelOutcome, EngineDeps, EquipmentRequest,
    Invitee, SweepReport, WaitlistRequest,
};
pub use refund::{RefundOutcome, RefundPolicy, RefundTier};
pub use split::{PaymentError, PaymentSplitCoordinator};
pub use waitlist::{WaitlistEntry, WaitlistError, WaitlistManager, WaitlistStatus};
