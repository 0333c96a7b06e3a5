use chrono::{DateTime, Datelike, NaiveDate, Utc};
use courtside_catalog::{EquipmentInventory, EquipmentItem, PricingEngine};
use courtside_core::{
    BookingId, Clock, ClubId, Court, CourtDirectory, CourtId, PaymentMethod, PaymentProcessor, PlayerId, SlotKey,
    SurfaceType, TimeRange,
};
use courtside_shared::{DomainEvent, EventType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::availability::AvailabilityGrid;
use crate::config::EngineConfig;
use crate::error::{BookingError, BookingResult};
use crate::events::EventSink;
use crate::idempotency::IdempotencyGuard;
use crate::ledger::SlotLedger;
use crate::manager::{transition, BookingStore};
use crate::matchmaking::{OpenGameFilter, OpenGameRegistry, OpenGames};
use crate::models::{
    Actor, Booking, BookingMode, BookingStatus, JoinOutcome, Participant, ParticipantPaymentStatus,
    PaymentAuthorization,
};
use crate::refund::RefundOutcome;
use crate::split::{PaymentError, PaymentSplitCoordinator};
use crate::waitlist::{WaitlistEntry, WaitlistManager, WaitlistStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitee {
    pub player_id: PlayerId,
    #[serde(default)]
    pub skill_level: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentRequest {
    pub equipment_id: Uuid,
    pub quantity: u32,
    /// Defaults to the initiator.
    #[serde(default)]
    pub renter: Option<PlayerId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub court_id: CourtId,
    pub range: TimeRange,
    pub initiator: PlayerId,
    #[serde(default)]
    pub initiator_skill: Option<f32>,
    pub mode: BookingMode,
    pub capacity: u8,
    #[serde(default)]
    pub invitees: Vec<Invitee>,
    #[serde(default)]
    pub equipment: Vec<EquipmentRequest>,
    #[serde(default)]
    pub custom_split: Option<BTreeMap<PlayerId, i64>>,
    /// When every payer has a method and the booking is ready, payment runs
    /// straight away.
    #[serde(default)]
    pub payment_methods: HashMap<PlayerId, PaymentMethod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitlistRequest {
    pub court_id: CourtId,
    pub range: TimeRange,
    pub player_id: PlayerId,
    #[serde(default)]
    pub skill_level: Option<f32>,
    pub mode: BookingMode,
    pub capacity: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    /// Set when the immediate payment attempt failed; the booking stays held
    /// for a retry.
    pub payment_error: Option<String>,
    /// The idempotency key had already produced this booking.
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub booking: Booking,
    pub refund: Option<RefundOutcome>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<BookingId>,
    pub awaiting_payment: Vec<BookingId>,
    pub completed: Vec<BookingId>,
    pub claims_dropped: usize,
    pub waitlist_expired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
            && self.awaiting_payment.is_empty()
            && self.completed.is_empty()
            && self.claims_dropped == 0
            && self.waitlist_expired == 0
    }
}

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub courts: Arc<dyn CourtDirectory>,
    pub pricing: PricingEngine,
    pub equipment: EquipmentInventory,
    pub payments: Arc<dyn PaymentProcessor>,
    pub events: Arc<dyn EventSink>,
}

/// Outcome of the final step of a checkout.
enum Commit {
    Confirmed(Booking),
    /// Cancelled or expired while the payment was in flight.
    Abandoned { status: BookingStatus, expire: bool },
}

enum Promotion {
    Joined(BookingId),
    Created(BookingId),
}

impl Promotion {
    fn booking_id(&self) -> BookingId {
        match self {
            Promotion::Joined(id) | Promotion::Created(id) => *id,
        }
    }
}

/// Drives bookings through `Held -> AwaitingPayment -> Confirmed` and the
/// exits to `Expired`, `Cancelled` and `Completed`.
///
/// Lock order is booking, then court calendar, then equipment. No lock is
/// held across a payment processor call.
pub struct BookingOrchestrator {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    courts: Arc<dyn CourtDirectory>,
    pricing: PricingEngine,
    equipment: Mutex<EquipmentInventory>,
    ledger: SlotLedger,
    bookings: BookingStore,
    open_games: OpenGameRegistry,
    waitlist: WaitlistManager,
    payments: PaymentSplitCoordinator,
    events: Arc<dyn EventSink>,
    idempotency: IdempotencyGuard,
    /// Serializes admission of new bookings.
    admission: Mutex<()>,
}

impl BookingOrchestrator {
    pub fn new(deps: EngineDeps) -> Arc<Self> {
        // Keys live as long as the longest hold a request can produce.
        let key_ttl = deps.config.open_game_grace() + deps.config.hold_ttl();
        Arc::new(Self {
            ledger: SlotLedger::new(deps.clock.clone()),
            config: deps.config,
            clock: deps.clock,
            courts: deps.courts,
            pricing: deps.pricing,
            equipment: Mutex::new(deps.equipment),
            bookings: BookingStore::new(),
            open_games: OpenGameRegistry::new(),
            waitlist: WaitlistManager::new(),
            payments: PaymentSplitCoordinator::new(deps.payments),
            events: deps.events,
            idempotency: IdempotencyGuard::new(key_ttl),
            admission: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn ledger(&self) -> &SlotLedger {
        &self.ledger
    }

    pub fn waitlist(&self) -> &WaitlistManager {
        &self.waitlist
    }

    pub fn equipment_item(&self, equipment_id: &Uuid) -> Option<EquipmentItem> {
        self.equipment.lock().get(equipment_id).cloned()
    }

    pub fn equipment_for(&self, club_id: ClubId) -> Vec<EquipmentItem> {
        self.equipment.lock().list(club_id)
    }

    // ---------------------------------------------------------------
    // Requests
    // ---------------------------------------------------------------

    /// Hold a slot, attach players and equipment, and pay right away when the
    /// request carries a method for every payer.
    ///
    /// With an idempotency key, a retried request from the same initiator
    /// returns the booking the first successful attempt created.
    pub async fn request_booking(
        self: &Arc<Self>,
        req: BookingRequest,
        idempotency_key: Option<String>,
    ) -> BookingResult<BookingReceipt> {
        let slot = match &idempotency_key {
            Some(key) => Some(
                self.idempotency
                    .acquire(req.initiator, key, self.clock.now())
                    .await,
            ),
            None => None,
        };
        if let Some(existing) = slot.as_ref().and_then(|s| s.existing()) {
            tracing::info!(booking_id = %existing, "idempotent replay");
            return Ok(BookingReceipt {
                booking: self.bookings.get(&existing)?,
                payment_error: None,
                replayed: true,
            });
        }

        let methods = req.payment_methods.clone();
        let booking = self.create_booking(req).await?;
        if let Some(slot) = slot {
            slot.record(booking.id);
        }

        let mut payment_error = None;
        if !methods.is_empty() && booking.ready_for_payment(self.clock.now(), self.config.open_game_grace()) {
            if let Err(err) = self.submit_payment(booking.id, methods).await {
                payment_error = Some(err.to_string());
            }
        }

        Ok(BookingReceipt {
            booking: self.bookings.get(&booking.id)?,
            payment_error,
            replayed: false,
        })
    }

    async fn create_booking(&self, req: BookingRequest) -> BookingResult<Booking> {
        let court = self.courts.require_court(req.court_id).await?;
        let booking = self.hold_booking(&court, req, self.clock.now())?;

        tracing::info!(
            booking_id = %booking.id,
            court_id = %booking.court_id,
            range = %booking.range,
            mode = ?booking.mode,
            total_cents = booking.total_price_cents,
            "booking held"
        );
        self.publish(EventType::BookingCreated, &booking, json!({})).await;
        Ok(booking)
    }

    /// Validate, claim the slot and equipment, and store the new booking.
    /// Runs under the admission lock so per-player limits see every booking
    /// admitted before this one.
    fn hold_booking(&self, court: &Court, req: BookingRequest, now: DateTime<Utc>) -> BookingResult<Booking> {
        self.validate_slot(court, &req.range, now)?;
        let _admission = self.admission.lock();
        self.check_weekly_limit(req.initiator, &req.range)?;
        if req.capacity == 0 || req.capacity > self.config.max_capacity {
            return Err(BookingError::InvalidRequest(format!(
                "capacity must be between 1 and {}",
                self.config.max_capacity
            )));
        }
        if req.invitees.len() + 1 > usize::from(req.capacity) {
            return Err(BookingError::InvalidRequest("more invitees than seats".to_string()));
        }
        if req.custom_split.is_some() && req.mode == BookingMode::OpenGame {
            return Err(BookingError::InvalidRequest(
                "open games split the price evenly between whoever joins".to_string(),
            ));
        }

        let quote = self.pricing.quote(court, &req.range)?;
        let mut booking = Booking::new(
            court.club_id,
            court.id,
            req.range,
            req.mode,
            req.capacity,
            Participant::new(req.initiator, req.initiator_skill, now),
            quote.total_cents,
            &self.config.currency,
            now,
        );
        for invitee in &req.invitees {
            booking.add_participant(
                Actor::Player(req.initiator),
                Participant::new(invitee.player_id, invitee.skill_level, now),
                self.config.skill_range_allowed,
            )?;
        }
        booking.custom_split = req.custom_split;

        // Open games get the gathering window on top of the payment window.
        let ttl = match req.mode {
            BookingMode::OpenGame => self.config.open_game_grace() + self.config.hold_ttl(),
            BookingMode::InviteOnly => self.config.hold_ttl(),
        };
        let token = self
            .ledger
            .try_hold(booking.id, court.id, req.range, ttl)
            .map_err(|err| {
                tracing::debug!(court_id = %court.id, range = %req.range, "slot conflict");
                BookingError::from(err)
            })?;

        let rentals: Vec<(Uuid, PlayerId, u32)> = req
            .equipment
            .iter()
            .map(|e| (e.equipment_id, e.renter.unwrap_or(req.initiator), e.quantity))
            .collect();
        if !rentals.is_empty() {
            let reserved = self.equipment.lock().reserve_all(court.club_id, &rentals);
            match reserved {
                Ok(lines) => booking.attach_equipment(lines),
                Err(err) => {
                    self.ledger.release(&token);
                    return Err(err.into());
                }
            }
        }

        if booking.custom_split.is_some() {
            if let Err(err) = PaymentSplitCoordinator::compute_split(&booking) {
                self.ledger.release(&token);
                self.equipment.lock().release_all(&booking.equipment);
                return Err(err.into());
            }
        }

        booking.hold_expires_at = token.expires_at;
        booking.hold = Some(token);
        if booking.accepts_joiners() {
            self.open_games.index(&booking);
        }
        self.bookings.insert(booking.clone());
        Ok(booking)
    }

    /// Bookings a player initiated in the ISO week of `range`, counting
    /// completed ones but not cancelled or expired.
    fn check_weekly_limit(&self, player_id: PlayerId, range: &TimeRange) -> BookingResult<()> {
        let Some(limit) = self.config.max_bookings_per_player_per_week else {
            return Ok(());
        };
        let week = range.start.iso_week();
        let booked = self
            .bookings
            .ids_where(|b| {
                b.initiator == player_id
                    && b.range.start.iso_week() == week
                    && (b.status.is_active() || b.status == BookingStatus::Completed)
            })
            .len();
        if booked >= limit as usize {
            tracing::debug!(%player_id, booked, limit, "weekly booking limit reached");
            return Err(BookingError::LimitReached(format!(
                "at most {} bookings per week",
                limit
            )));
        }
        Ok(())
    }

    fn validate_slot(&self, court: &Court, range: &TimeRange, now: DateTime<Utc>) -> BookingResult<()> {
        TimeRange::new(range.start, range.end)?;
        if !court.is_active {
            return Err(BookingError::InvalidRequest(format!("court {} is not active", court.id)));
        }
        if !court.operating_hours.admits(range) {
            return Err(BookingError::InvalidRequest(format!(
                "{} is outside the opening hours of {}",
                range, court.name
            )));
        }
        if let Some(blackout) = court.blackout_during(range) {
            return Err(BookingError::InvalidRequest(format!(
                "{} is closed from {}{}",
                court.name,
                blackout.range,
                blackout.reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default()
            )));
        }
        if range.start < now + self.config.min_notice() {
            return Err(BookingError::InvalidRequest(format!(
                "bookings need at least {} minutes notice",
                self.config.min_booking_notice_minutes
            )));
        }
        if range.start > now + self.config.max_advance() {
            return Err(BookingError::InvalidRequest(format!(
                "bookings open {} days in advance",
                self.config.max_advance_days
            )));
        }
        Ok(())
    }

    pub fn get_booking(&self, booking_id: &BookingId) -> BookingResult<Booking> {
        self.bookings.get(booking_id)
    }

    /// Invite a player onto a booking. On invite-only bookings only the
    /// initiator or staff may do this.
    pub fn add_participant(&self, booking_id: &BookingId, actor: Actor, invitee: Invitee) -> BookingResult<JoinOutcome> {
        let now = self.clock.now();
        let outcome = self.bookings.update(booking_id, |b| {
            let skill_warning = b.add_participant(
                actor,
                Participant::new(invitee.player_id, invitee.skill_level, now),
                self.config.skill_range_allowed,
            )?;
            if b.is_full() {
                self.open_games.unindex(&b.id);
            }
            Ok(JoinOutcome {
                booking: b.clone(),
                skill_warning,
            })
        })?;
        tracing::info!(booking_id = %booking_id, player_id = %invitee.player_id, "participant added");
        Ok(outcome)
    }

    /// Take a seat in an open game.
    pub async fn join_open_game(
        self: &Arc<Self>,
        booking_id: &BookingId,
        player_id: PlayerId,
        skill_level: Option<f32>,
    ) -> BookingResult<JoinOutcome> {
        let now = self.clock.now();
        let snapshot = self.bookings.get(booking_id)?;
        if snapshot.status.is_pending() && snapshot.hold_expires_at <= now {
            self.expire_booking(booking_id).await?;
            return Err(BookingError::ClosedOrAlreadyConfirmed);
        }

        self.open_games.join(
            &self.bookings,
            booking_id,
            Participant::new(player_id, skill_level, now),
            self.config.skill_range_allowed,
        )
    }

    pub fn list_open_games(&self, filter: &OpenGameFilter) -> OpenGames {
        self.open_games
            .list(&self.bookings, filter, self.config.skill_range_allowed)
    }

    pub async fn availability(
        &self,
        club_id: ClubId,
        date: NaiveDate,
        surface_type: Option<SurfaceType>,
    ) -> BookingResult<AvailabilityGrid> {
        let courts = self.courts.list_courts(club_id, surface_type).await?;
        Ok(AvailabilityGrid::build(
            courts,
            date,
            self.config.slot_length(),
            &self.ledger,
            &self.pricing,
            self.clock.now(),
        ))
    }

    // ---------------------------------------------------------------
    // Payment
    // ---------------------------------------------------------------

    /// Authorize and capture every participant's share, then confirm.
    ///
    /// A declined share leaves the booking held for another attempt until the
    /// attempt limit or the hold expiry is reached.
    pub async fn submit_payment(
        self: &Arc<Self>,
        booking_id: BookingId,
        methods: HashMap<PlayerId, PaymentMethod>,
    ) -> BookingResult<Booking> {
        let now = self.clock.now();
        let grace = self.config.open_game_grace();

        let claimed = self.bookings.update(&booking_id, |b| {
            match b.status {
                BookingStatus::Held | BookingStatus::AwaitingPayment => {}
                BookingStatus::Expired => return Err(BookingError::HoldExpired(b.id)),
                status => return Err(BookingError::InvalidState(status)),
            }
            if b.checkout_in_progress {
                return Err(BookingError::PaymentInProgress);
            }
            if b.hold_expires_at <= now {
                return Err(BookingError::HoldExpired(b.id));
            }
            if !b.ready_for_payment(now, grace) {
                return Err(BookingError::NotReady(format!(
                    "open game has {} of {} players",
                    b.participants.len(),
                    b.capacity
                )));
            }

            let shares = PaymentSplitCoordinator::compute_split(b)?;
            PaymentSplitCoordinator::check_methods(&shares, &methods)?;
            if b.status == BookingStatus::Held {
                transition(b, BookingStatus::AwaitingPayment, now)?;
            }
            b.checkout_in_progress = true;
            for p in b.participants.iter_mut() {
                p.amount_owed_cents = shares.get(&p.player_id).copied().unwrap_or(0);
            }
            Ok((shares, b.currency.clone(), b.initiator))
        });

        let (shares, currency, initiator) = match claimed {
            Ok(claimed) => claimed,
            Err(BookingError::HoldExpired(id)) => {
                self.expire_booking(&id).await?;
                return Err(BookingError::HoldExpired(id));
            }
            Err(err) => return Err(err),
        };
        self.open_games.unindex(&booking_id);

        let mut auth = match self
            .payments
            .authorize(booking_id, &shares, &methods, &currency, now)
            .await
        {
            Ok(auth) => auth,
            Err(err) => return Err(self.payment_failed(booking_id, err).await),
        };
        if let Err(err) = self.payments.capture(&mut auth).await {
            return Err(self.payment_failed(booking_id, err).await);
        }

        let now = self.clock.now();
        let commit = self.bookings.update(&booking_id, |b| {
            b.checkout_in_progress = false;
            if !b.status.is_pending() {
                return Ok(Commit::Abandoned {
                    status: b.status,
                    expire: false,
                });
            }
            let confirmed = b.hold.as_ref().map(|token| self.ledger.confirm(token));
            if !matches!(confirmed, Some(Ok(()))) {
                return Ok(Commit::Abandoned {
                    status: b.status,
                    expire: true,
                });
            }

            transition(b, BookingStatus::Confirmed, now)?;
            for p in b.participants.iter_mut() {
                p.payment_status = ParticipantPaymentStatus::Paid;
            }
            b.payment = Some(auth.clone());
            if let Err(err) = self.equipment.lock().commit_all(&b.equipment) {
                tracing::warn!(booking_id = %b.id, error = %err, "equipment commit failed");
            }
            Ok(Commit::Confirmed(b.clone()))
        })?;

        match commit {
            Commit::Confirmed(booking) => {
                tracing::info!(
                    booking_id = %booking.id,
                    total_cents = booking.total_price_cents,
                    "booking confirmed"
                );
                self.publish(
                    EventType::BookingConfirmed,
                    &booking,
                    json!({ "shares": shares_payload(&auth) }),
                )
                .await;
                Ok(booking)
            }
            Commit::Abandoned { status, expire } => {
                tracing::warn!(%booking_id, ?status, "booking closed during checkout, refunding");
                self.settle_abandoned(booking_id, auth, initiator).await?;
                if expire {
                    self.expire_booking(&booking_id).await?;
                    Err(BookingError::HoldExpired(booking_id))
                } else {
                    Err(BookingError::InvalidState(status))
                }
            }
        }
    }

    /// Money was captured for a booking that closed underneath the checkout:
    /// give it all back.
    async fn settle_abandoned(
        &self,
        booking_id: BookingId,
        mut auth: PaymentAuthorization,
        initiator: PlayerId,
    ) -> BookingResult<()> {
        let outcome = self.payments.refund(&mut auth, 100, initiator).await;
        let booking = self.bookings.update(&booking_id, |b| {
            b.payment = Some(auth);
            for player in outcome.refunded.keys() {
                b.set_payment_status(player, ParticipantPaymentStatus::Refunded);
            }
            if !outcome.is_complete() {
                b.refund_pending = true;
            }
            Ok(b.clone())
        })?;
        if !outcome.is_complete() {
            self.publish(
                EventType::PaymentFailed,
                &booking,
                json!({ "stage": "refund", "players": outcome.failed }),
            )
            .await;
        }
        Ok(())
    }

    /// Count a failed attempt, report it, and expire the booking once the
    /// attempt limit is reached. Returns the error for the caller.
    async fn payment_failed(self: &Arc<Self>, booking_id: BookingId, err: PaymentError) -> BookingError {
        let failed_player = match &err {
            PaymentError::Declined { player_id, .. }
            | PaymentError::PartialFailure { player_id, .. }
            | PaymentError::CaptureFailed { player_id, .. } => Some(*player_id),
            _ => None,
        };
        if !err.is_processor_outcome() {
            let _ = self.bookings.update(&booking_id, |b| {
                b.checkout_in_progress = false;
                if b.accepts_joiners() {
                    self.open_games.index(b);
                }
                Ok(())
            });
            return err.into();
        }

        let max_attempts = self.config.max_payment_attempts;
        let updated = self.bookings.update(&booking_id, |b| {
            b.checkout_in_progress = false;
            b.payment_attempts += 1;
            if let Some(player) = failed_player {
                b.set_payment_status(&player, ParticipantPaymentStatus::Failed);
            }
            if b.accepts_joiners() {
                self.open_games.index(b);
            }
            Ok(b.clone())
        });

        let booking_err = BookingError::from(err);
        let Ok(booking) = updated else {
            return booking_err;
        };

        tracing::warn!(
            %booking_id,
            attempt = booking.payment_attempts,
            max_attempts,
            error = %booking_err,
            "payment attempt failed"
        );
        self.publish(
            EventType::PaymentFailed,
            &booking,
            json!({
                "stage": "authorization",
                "code": booking_err.code(),
                "reason": booking_err.to_string(),
                "player_id": failed_player,
                "attempt": booking.payment_attempts,
            }),
        )
        .await;

        if booking.payment_attempts >= max_attempts {
            if let Err(expire_err) = self.expire_booking(&booking_id).await {
                tracing::error!(%booking_id, error = %expire_err, "failed to expire booking");
            }
        }
        booking_err
    }

    // ---------------------------------------------------------------
    // Exits
    // ---------------------------------------------------------------

    /// Expire a pending booking whose hold lapsed. Returns false when the
    /// booking had already moved on or is mid-checkout.
    async fn expire_booking(self: &Arc<Self>, booking_id: &BookingId) -> BookingResult<bool> {
        let now = self.clock.now();
        let expired = self.bookings.update(booking_id, |b| {
            if !b.status.is_pending() || b.checkout_in_progress {
                return Ok(None);
            }
            transition(b, BookingStatus::Expired, now)?;
            if let Some(token) = b.hold.take() {
                self.ledger.release(&token);
            }
            self.equipment.lock().release_all(&b.equipment);
            Ok(Some(b.clone()))
        })?;

        let Some(booking) = expired else {
            return Ok(false);
        };
        self.open_games.unindex(booking_id);
        tracing::info!(booking_id = %booking.id, "booking expired");
        self.publish(EventType::BookingExpired, &booking, json!({})).await;
        self.on_capacity_freed(booking.slot_key());
        Ok(true)
    }

    /// Cancel a booking. Confirmed bookings are refunded per the club policy;
    /// a refund the processor rejects leaves the booking flagged
    /// `refund_pending`.
    pub async fn cancel(self: &Arc<Self>, booking_id: &BookingId, actor: Actor) -> BookingResult<CancelOutcome> {
        let now = self.clock.now();
        let (booking, prior) = self.bookings.update(booking_id, |b| {
            b.ensure_can_cancel(&actor)?;
            let prior = b.status;
            if !prior.is_active() {
                return Err(BookingError::NotCancellable(prior));
            }
            transition(b, BookingStatus::Cancelled, now)?;
            if let Some(token) = b.hold.take() {
                self.ledger.release(&token);
            }
            let mut equipment = self.equipment.lock();
            if prior != BookingStatus::Confirmed {
                equipment.release_all(&b.equipment);
            } else if !b.equipment_returned {
                equipment.return_all(&b.equipment);
            }
            b.equipment_returned = true;
            Ok((b.clone(), prior))
        })?;
        self.open_games.unindex(booking_id);

        let mut refund = None;
        let mut booking = booking;
        if prior == BookingStatus::Confirmed {
            if let Some(mut auth) = booking.payment.clone() {
                let percent = self.config.refund_policy.refund_percent(booking.range.start - now);
                let outcome = self.payments.refund(&mut auth, percent, booking.initiator).await;
                booking = self.bookings.update(booking_id, |b| {
                    b.payment = Some(auth);
                    for player in outcome.refunded.keys() {
                        b.set_payment_status(player, ParticipantPaymentStatus::Refunded);
                    }
                    if !outcome.is_complete() {
                        b.refund_pending = true;
                    }
                    Ok(b.clone())
                })?;
                if !outcome.is_complete() {
                    tracing::error!(%booking_id, failed = outcome.failed.len(), "refund incomplete, flagged for follow-up");
                    self.publish(
                        EventType::PaymentFailed,
                        &booking,
                        json!({ "stage": "refund", "players": outcome.failed }),
                    )
                    .await;
                }
                refund = Some(outcome);
            }
        }

        tracing::info!(%booking_id, ?prior, ?actor, "booking cancelled");
        self.publish(
            EventType::BookingCancelled,
            &booking,
            json!({
                "previous_status": prior,
                "refund_percent": refund.as_ref().map(|r| r.refund_percent),
                "refunded_cents": refund.as_ref().map(|r| r.total_refunded_cents()),
                "refund_pending": booking.refund_pending,
            }),
        )
        .await;
        self.on_capacity_freed(booking.slot_key());

        Ok(CancelOutcome { booking, refund })
    }

    /// Staff move a booking to another range or court. The new range is
    /// claimed before the old one is released.
    pub async fn reschedule(
        self: &Arc<Self>,
        booking_id: &BookingId,
        actor: Actor,
        court_id: Option<CourtId>,
        range: TimeRange,
    ) -> BookingResult<Booking> {
        if !actor.is_staff() {
            return Err(BookingError::NotAuthorized("only staff may reschedule".to_string()));
        }
        let now = self.clock.now();
        let current = self.bookings.get(booking_id)?;
        let court = self
            .courts
            .require_court(court_id.unwrap_or(current.court_id))
            .await?;
        if court.club_id != current.club_id {
            return Err(BookingError::InvalidRequest(
                "cannot move a booking to another club".to_string(),
            ));
        }
        self.validate_slot(&court, &range, now)?;

        let (booking, freed) = self.bookings.update(booking_id, |b| {
            if !b.status.is_active() {
                return Err(BookingError::InvalidState(b.status));
            }
            if b.checkout_in_progress {
                return Err(BookingError::PaymentInProgress);
            }
            let token = b
                .hold
                .clone()
                .ok_or_else(|| BookingError::Internal(format!("booking {} has no claim", b.id)))?;
            let moved = self.ledger.relocate(&token, court.id, range)?;
            let freed = b.slot_key();
            b.court_id = court.id;
            b.range = range;
            b.hold = Some(moved);
            b.updated_at = now;
            Ok((b.clone(), freed))
        })?;

        if self.open_games.contains(booking_id) {
            self.open_games.index(&booking);
        }
        tracing::info!(%booking_id, from = %freed.range, to = %booking.range, "booking rescheduled");
        self.on_capacity_freed(freed);
        Ok(booking)
    }

    /// Staff record rented equipment coming back before the booking has
    /// completed. Lines listed in `damaged` are written off instead of going
    /// back on the shelf.
    pub fn return_equipment(&self, booking_id: &BookingId, actor: Actor, damaged: &[Uuid]) -> BookingResult<Booking> {
        if !actor.is_staff() {
            return Err(BookingError::NotAuthorized(
                "only staff may record equipment returns".to_string(),
            ));
        }
        let now = self.clock.now();
        let booking = self.bookings.update(booking_id, |b| {
            if b.status != BookingStatus::Confirmed || b.equipment_returned {
                return Err(BookingError::InvalidState(b.status));
            }
            if let Some(unknown) = damaged
                .iter()
                .find(|id| !b.equipment.iter().any(|line| &line.equipment_id == *id))
            {
                return Err(BookingError::InvalidRequest(format!(
                    "equipment {} was not rented on this booking",
                    unknown
                )));
            }

            let mut inventory = self.equipment.lock();
            for line in &b.equipment {
                inventory.return_rented(&line.equipment_id, line.quantity, damaged.contains(&line.equipment_id))?;
            }
            b.equipment_returned = true;
            b.updated_at = now;
            Ok(b.clone())
        })?;

        if damaged.is_empty() {
            tracing::info!(%booking_id, "equipment returned");
        } else {
            tracing::warn!(%booking_id, damaged = damaged.len(), "equipment returned damaged");
        }
        Ok(booking)
    }

    // ---------------------------------------------------------------
    // Waitlist
    // ---------------------------------------------------------------

    pub async fn enqueue_waitlist(&self, req: WaitlistRequest) -> BookingResult<WaitlistEntry> {
        TimeRange::new(req.range.start, req.range.end)?;
        let court = self.courts.require_court(req.court_id).await?;
        if req.capacity == 0 || req.capacity > self.config.max_capacity {
            return Err(BookingError::InvalidRequest(format!(
                "capacity must be between 1 and {}",
                self.config.max_capacity
            )));
        }
        let now = self.clock.now();
        if req.range.start <= now {
            return Err(BookingError::InvalidRequest("slot has already started".to_string()));
        }
        if self.ledger.is_available(court.id, &req.range) {
            return Err(BookingError::InvalidRequest(
                "slot is free, book it directly".to_string(),
            ));
        }

        let entry = self.waitlist.enqueue(WaitlistEntry {
            id: Uuid::new_v4(),
            player_id: req.player_id,
            club_id: court.club_id,
            slot_key: SlotKey::new(court.id, req.range),
            capacity: req.capacity,
            mode: req.mode,
            skill_level: req.skill_level,
            requested_at: now,
            status: WaitlistStatus::Queued,
            promoted_booking: None,
        })?;
        tracing::info!(entry_id = %entry.id, player_id = %entry.player_id, slot = %entry.slot_key.range, "waitlisted");
        Ok(entry)
    }

    pub fn cancel_waitlist(&self, entry_id: &Uuid, actor: Actor) -> BookingResult<WaitlistEntry> {
        let entry = self
            .waitlist
            .get(entry_id)
            .ok_or_else(|| BookingError::NotFound(format!("waitlist entry {}", entry_id)))?;
        if !actor.is_staff() && actor != Actor::Player(entry.player_id) {
            return Err(BookingError::NotAuthorized(
                "only the waiting player or staff may cancel".to_string(),
            ));
        }
        Ok(self.waitlist.cancel(entry_id)?)
    }

    /// Hand freed capacity to the waitlist on a separate task so the caller
    /// that freed it never waits on promotion.
    pub fn on_capacity_freed(self: &Arc<Self>, freed: SlotKey) -> JoinHandle<Option<WaitlistEntry>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.promote_waitlist(freed).await })
    }

    /// Walk the candidates in FIFO order until one promotion sticks.
    async fn promote_waitlist(&self, freed: SlotKey) -> Option<WaitlistEntry> {
        for entry in self.waitlist.candidates(&freed) {
            if !self.waitlist.claim(&entry.id) {
                continue;
            }

            let promotion = match self.try_promote(&entry).await {
                Ok(promotion) => promotion,
                Err(err) => {
                    tracing::debug!(entry_id = %entry.id, error = %err, "promotion attempt failed");
                    self.waitlist.release_claim(&entry.id);
                    continue;
                }
            };

            match self.waitlist.finish_promotion(&entry.id, promotion.booking_id()) {
                Ok(promoted) => {
                    tracing::info!(
                        entry_id = %promoted.id,
                        booking_id = %promotion.booking_id(),
                        "waitlist entry promoted"
                    );
                    let event = DomainEvent::new(
                        EventType::WaitlistPromoted,
                        Some(promotion.booking_id()),
                        self.clock.now(),
                        json!({
                            "entry_id": promoted.id,
                            "player_id": promoted.player_id,
                            "court_id": promoted.slot_key.court_id,
                            "start": promoted.slot_key.range.start,
                            "end": promoted.slot_key.range.end,
                        }),
                    );
                    self.events.publish(event).await;
                    return Some(promoted);
                }
                Err(err) => {
                    tracing::info!(entry_id = %entry.id, error = %err, "rolling back promotion");
                    self.roll_back(&promotion, entry.player_id).await;
                }
            }
        }
        None
    }

    /// Join an open game already on the freed slot, or hold a new booking.
    async fn try_promote(&self, entry: &WaitlistEntry) -> BookingResult<Promotion> {
        let key = entry.slot_key;
        let open = self
            .bookings
            .ids_where(|b| b.slot_key() == key && b.accepts_joiners());
        for booking_id in open {
            let now = self.clock.now();
            let joined = self.open_games.join(
                &self.bookings,
                &booking_id,
                Participant::new(entry.player_id, entry.skill_level, now),
                self.config.skill_range_allowed,
            );
            if joined.is_ok() {
                return Ok(Promotion::Joined(booking_id));
            }
        }

        let booking = self
            .create_booking(BookingRequest {
                court_id: key.court_id,
                range: key.range,
                initiator: entry.player_id,
                initiator_skill: entry.skill_level,
                mode: entry.mode,
                capacity: entry.capacity,
                invitees: Vec::new(),
                equipment: Vec::new(),
                custom_split: None,
                payment_methods: HashMap::new(),
            })
            .await?;
        Ok(Promotion::Created(booking.id))
    }

    async fn roll_back(&self, promotion: &Promotion, player_id: PlayerId) {
        let now = self.clock.now();
        match promotion {
            Promotion::Joined(booking_id) => {
                let _ = self.bookings.update(booking_id, |b| {
                    b.remove_participant(&player_id, now);
                    if b.accepts_joiners() {
                        self.open_games.index(b);
                    }
                    Ok(())
                });
            }
            Promotion::Created(booking_id) => {
                let discarded = self.bookings.update(booking_id, |b| {
                    transition(b, BookingStatus::Cancelled, now)?;
                    if let Some(token) = b.hold.take() {
                        self.ledger.release(&token);
                    }
                    Ok(b.clone())
                });
                self.open_games.unindex(booking_id);
                if let Ok(booking) = discarded {
                    self.publish(EventType::BookingCancelled, &booking, json!({ "reason": "waitlist_cancelled" }))
                        .await;
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Sweep
    // ---------------------------------------------------------------

    /// Periodic housekeeping: expire lapsed holds, move open games past their
    /// grace period to payment, complete finished bookings, and drop stale
    /// ledger claims and waitlist entries.
    pub async fn sweep(self: &Arc<Self>) -> SweepReport {
        let now = self.clock.now();
        let grace = self.config.open_game_grace();
        let mut report = SweepReport::default();

        let lapsed = self
            .bookings
            .ids_where(|b| b.status.is_pending() && !b.checkout_in_progress && b.hold_expires_at <= now);
        for booking_id in lapsed {
            match self.expire_booking(&booking_id).await {
                Ok(true) => report.expired.push(booking_id),
                Ok(false) => {}
                Err(err) => tracing::error!(%booking_id, error = %err, "sweep failed to expire booking"),
            }
        }

        let gathering = self.bookings.ids_where(|b| {
            b.status == BookingStatus::Held && b.mode == BookingMode::OpenGame && b.ready_for_payment(now, grace)
        });
        for booking_id in gathering {
            let moved = self
                .bookings
                .update(&booking_id, |b| transition(b, BookingStatus::AwaitingPayment, now));
            if moved.is_ok() {
                report.awaiting_payment.push(booking_id);
            }
        }

        let finished = self
            .bookings
            .ids_where(|b| b.status == BookingStatus::Confirmed && b.range.end <= now);
        for booking_id in finished {
            let completed = self.bookings.update(&booking_id, |b| {
                transition(b, BookingStatus::Completed, now)?;
                if !b.equipment_returned {
                    self.equipment.lock().return_all(&b.equipment);
                    b.equipment_returned = true;
                }
                Ok(b.clone())
            });
            if let Ok(booking) = completed {
                self.publish(EventType::BookingCompleted, &booking, json!({})).await;
                report.completed.push(booking_id);
            }
        }

        report.claims_dropped = self.ledger.sweep_expired(now);
        self.idempotency.evict_expired(now);
        report.waitlist_expired = self.waitlist.expire_stale(now).len();

        if !report.is_empty() {
            tracing::info!(
                expired = report.expired.len(),
                awaiting_payment = report.awaiting_payment.len(),
                completed = report.completed.len(),
                claims_dropped = report.claims_dropped,
                waitlist_expired = report.waitlist_expired,
                "sweep finished"
            );
        }
        report
    }

    async fn publish(&self, event_type: EventType, booking: &Booking, extra: serde_json::Value) {
        let mut payload = json!({
            "booking_id": booking.id,
            "club_id": booking.club_id,
            "court_id": booking.court_id,
            "start": booking.range.start,
            "end": booking.range.end,
            "status": booking.status,
            "mode": booking.mode,
            "initiator": booking.initiator,
            "participants": booking.participants.iter().map(|p| p.player_id).collect::<Vec<_>>(),
            "total_price_cents": booking.total_price_cents,
            "currency": booking.currency,
        });
        if let (Some(payload), serde_json::Value::Object(extra)) = (payload.as_object_mut(), extra) {
            payload.extend(extra);
        }
        let event = DomainEvent::new(event_type, Some(booking.id), self.clock.now(), payload);
        self.events.publish(event).await;
    }
}

fn shares_payload(auth: &PaymentAuthorization) -> serde_json::Value {
    auth.charges
        .iter()
        .map(|c| json!({ "player_id": c.player_id, "amount_cents": c.amount_cents }))
        .collect()
}
