use chrono::{DateTime, Utc};
use courtside_catalog::RentalLine;
use courtside_core::{BookingId, ClubId, CourtId, PlayerId, ProcessorToken, SlotKey, TimeRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::BookingError;
use crate::ledger::HoldToken;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Held,
    AwaitingPayment,
    Confirmed,
    Completed,
    Expired,
    Cancelled,
}

impl BookingStatus {
    /// Held or awaiting payment: the slot is claimed but nobody has paid.
    pub fn is_pending(&self) -> bool {
        matches!(self, BookingStatus::Held | BookingStatus::AwaitingPayment)
    }

    /// Still occupying its slot.
    pub fn is_active(&self) -> bool {
        self.is_pending() || *self == BookingStatus::Confirmed
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Held => "HELD",
            BookingStatus::AwaitingPayment => "AWAITING_PAYMENT",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Who may add players: anyone (open game) or only the initiator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingMode {
    OpenGame,
    InviteOnly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Player(PlayerId),
    Staff(Uuid),
}

impl Actor {
    pub fn is_staff(&self) -> bool {
        matches!(self, Actor::Staff(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub player_id: PlayerId,
    pub skill_level: Option<f32>,
    pub amount_owed_cents: i64,
    pub payment_status: ParticipantPaymentStatus,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(player_id: PlayerId, skill_level: Option<f32>, joined_at: DateTime<Utc>) -> Self {
        Self {
            player_id,
            skill_level,
            amount_owed_cents: 0,
            payment_status: ParticipantPaymentStatus::Pending,
            joined_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationStatus {
    Pending,
    Authorized,
    Captured,
    Failed,
    Voided,
}

/// One participant's share of an authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeLine {
    pub player_id: PlayerId,
    pub amount_cents: i64,
    pub token: Option<ProcessorToken>,
    pub captured: bool,
    pub refunded_cents: i64,
}

/// The single authorization backing a booking. Sub-amounts always sum to
/// `total_cents`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentAuthorization {
    pub id: Uuid,
    pub booking_id: BookingId,
    pub total_cents: i64,
    pub currency: String,
    pub charges: Vec<ChargeLine>,
    pub status: AuthorizationStatus,
    pub created_at: DateTime<Utc>,
}

impl PaymentAuthorization {
    pub fn shares(&self) -> BTreeMap<PlayerId, i64> {
        self.charges.iter().map(|c| (c.player_id, c.amount_cents)).collect()
    }

    pub fn captured_cents(&self) -> i64 {
        self.charges.iter().filter(|c| c.captured).map(|c| c.amount_cents).sum()
    }
}

/// Returned with a successful join when the skill spread exceeds the club's
/// allowed range. Advisory only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SkillWarning {
    pub spread: f32,
    pub allowed: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub booking: Booking,
    pub skill_warning: Option<SkillWarning>,
}

/// One reservation of a court time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub club_id: ClubId,
    pub court_id: CourtId,
    pub range: TimeRange,
    pub status: BookingStatus,
    pub mode: BookingMode,
    pub capacity: u8,
    pub initiator: PlayerId,
    pub participants: Vec<Participant>,
    pub equipment: Vec<RentalLine>,
    /// Rented stock is back in inventory (or written off as damaged).
    #[serde(default)]
    pub equipment_returned: bool,
    pub court_price_cents: i64,
    pub total_price_cents: i64,
    pub currency: String,
    /// Court price shares agreed at creation; equal split when absent.
    pub custom_split: Option<BTreeMap<PlayerId, i64>>,
    pub skill_spread: Option<f32>,
    #[serde(skip)]
    pub hold: Option<HoldToken>,
    pub hold_expires_at: DateTime<Utc>,
    pub payment: Option<PaymentAuthorization>,
    pub payment_attempts: u32,
    pub checkout_in_progress: bool,
    pub refund_pending: bool,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        club_id: ClubId,
        court_id: CourtId,
        range: TimeRange,
        mode: BookingMode,
        capacity: u8,
        initiator: Participant,
        court_price_cents: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let initiator_id = initiator.player_id;
        let mut booking = Self {
            id: Uuid::new_v4(),
            club_id,
            court_id,
            range,
            status: BookingStatus::Held,
            mode,
            capacity,
            initiator: initiator_id,
            participants: vec![initiator],
            equipment: Vec::new(),
            equipment_returned: false,
            court_price_cents,
            total_price_cents: court_price_cents,
            currency: currency.to_string(),
            custom_split: None,
            skill_spread: None,
            hold: None,
            hold_expires_at: now,
            payment: None,
            payment_attempts: 0,
            checkout_in_progress: false,
            refund_pending: false,
            created_at: now,
            confirmed_at: None,
            updated_at: now,
        };
        booking.skill_spread = booking.compute_skill_spread();
        booking
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.court_id, self.range)
    }

    pub fn participant(&self, player_id: &PlayerId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.player_id == player_id)
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= usize::from(self.capacity)
    }

    pub fn open_seats(&self) -> usize {
        usize::from(self.capacity).saturating_sub(self.participants.len())
    }

    /// Listed in open-game discovery and joinable right now.
    pub fn accepts_joiners(&self) -> bool {
        self.mode == BookingMode::OpenGame
            && self.custom_split.is_none()
            && self.status.is_pending()
            && !self.checkout_in_progress
            && !self.is_full()
    }

    /// Attach equipment rentals and fold their charges into the total.
    pub fn attach_equipment(&mut self, lines: Vec<RentalLine>) {
        self.total_price_cents += lines.iter().map(|l| l.charge_cents).sum::<i64>();
        self.equipment.extend(lines);
    }

    /// Single check-and-add for a new participant.
    ///
    /// On an invite-only booking only the initiator (or staff) may add players.
    pub fn add_participant(
        &mut self,
        actor: Actor,
        participant: Participant,
        skill_range_allowed: f32,
    ) -> Result<Option<SkillWarning>, BookingError> {
        if !self.status.is_pending() {
            return Err(BookingError::ClosedOrAlreadyConfirmed);
        }
        if self.mode == BookingMode::InviteOnly {
            let by_organiser = actor == Actor::Player(self.initiator) || actor.is_staff();
            if !by_organiser {
                return Err(BookingError::NotOpen);
            }
        }
        if self.checkout_in_progress {
            return Err(BookingError::PaymentInProgress);
        }
        if self.participant(&participant.player_id).is_some() {
            return Err(BookingError::AlreadyJoined);
        }
        if self.is_full() {
            return Err(BookingError::Full);
        }
        if self.custom_split.is_some() {
            return Err(BookingError::InvalidRequest(
                "the price split is fixed to the players already on this booking".to_string(),
            ));
        }

        let joined_at = participant.joined_at;
        self.participants.push(participant);
        self.skill_spread = self.compute_skill_spread();
        self.touch(joined_at);

        Ok(self
            .skill_spread
            .filter(|spread| *spread > skill_range_allowed)
            .map(|spread| SkillWarning {
                spread,
                allowed: skill_range_allowed,
            }))
    }

    /// Drop a participant that was added speculatively (waitlist rollback).
    pub fn remove_participant(&mut self, player_id: &PlayerId, now: DateTime<Utc>) -> bool {
        if player_id == &self.initiator || !self.status.is_pending() {
            return false;
        }
        let before = self.participants.len();
        self.participants.retain(|p| &p.player_id != player_id);
        self.skill_spread = self.compute_skill_spread();
        self.touch(now);
        before != self.participants.len()
    }

    /// Skill-compatible with a player of the given level.
    pub fn skill_compatible(&self, level: f32, allowed: f32) -> bool {
        self.participants
            .iter()
            .filter_map(|p| p.skill_level)
            .all(|l| (l - level).abs() <= allowed)
    }

    /// Held -> AwaitingPayment once every required player is attached, or an
    /// open game's grace period has run out with at least the initiator.
    pub fn ready_for_payment(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        match self.mode {
            BookingMode::InviteOnly => true,
            BookingMode::OpenGame => {
                self.is_full() || (now >= self.created_at + grace && !self.participants.is_empty())
            }
        }
    }

    /// Cancellation rights: the initiator or staff.
    pub fn ensure_can_cancel(&self, actor: &Actor) -> Result<(), BookingError> {
        if actor.is_staff() || actor == &Actor::Player(self.initiator) {
            Ok(())
        } else {
            Err(BookingError::NotAuthorized(
                "only the initiator or staff may cancel".to_string(),
            ))
        }
    }

    /// Update status
    pub fn update_status(&mut self, status: BookingStatus, now: DateTime<Utc>) {
        self.status = status;
        self.touch(now);
    }

    pub fn set_payment_status(&mut self, player_id: &PlayerId, status: ParticipantPaymentStatus) {
        if let Some(p) = self.participants.iter_mut().find(|p| &p.player_id == player_id) {
            p.payment_status = status;
        }
    }

    fn compute_skill_spread(&self) -> Option<f32> {
        let levels: Vec<f32> = self.participants.iter().filter_map(|p| p.skill_level).collect();
        if levels.len() < 2 {
            return None;
        }
        let max = levels.iter().cloned().fold(f32::MIN, f32::max);
        let min = levels.iter().cloned().fold(f32::MAX, f32::min);
        Some(max - min)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
