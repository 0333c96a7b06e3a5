use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};
use async_trait::async_trait;
use courtside_booking::{
    Actor, BookingError, BookingMode, BookingOrchestrator, BookingRequest, BookingStatus, EngineConfig, EngineDeps,
    EquipmentRequest, Invitee, OpenGameFilter, ParticipantPaymentStatus, RecordingSink, RefundPolicy, RefundTier,
    WaitlistRequest, WaitlistStatus,
};
use courtside_catalog::{EquipmentInventory, EquipmentItem, ItemType, PricingConfig, PricingEngine, PricingRule};
use courtside_core::{
    Court, CourtBlackout, InMemoryCourtDirectory, ManualClock, MockPaymentProcessor, OperatingHours, PaymentMethod,
    PaymentProcessor, PlayerId, ProcessorError, ProcessorToken, SurfaceType, TimeRange,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

struct World {
    engine: Arc<BookingOrchestrator>,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingSink>,
    processor: Arc<MockPaymentProcessor>,
    court: Court,
    rackets: Uuid,
}

fn t(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap()
}

/// Holds every authorization until the test lets it through.
struct GatedProcessor {
    inner: Arc<MockPaymentProcessor>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl PaymentProcessor for GatedProcessor {
    async fn authorize(
        &self,
        amount_cents: i64,
        currency: &str,
        method: &PaymentMethod,
    ) -> Result<ProcessorToken, ProcessorError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.authorize(amount_cents, currency, method).await
    }

    async fn capture(&self, token: &ProcessorToken) -> Result<(), ProcessorError> {
        self.inner.capture(token).await
    }

    async fn void(&self, token: &ProcessorToken) -> Result<(), ProcessorError> {
        self.inner.void(token).await
    }

    async fn refund(&self, token: &ProcessorToken, amount_cents: i64) -> Result<(), ProcessorError> {
        self.inner.refund(token, amount_cents).await
    }
}

struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

/// A world whose payments stop inside authorization until released.
fn gated_world() -> (World, Gate) {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let gate = Gate {
        entered: entered.clone(),
        release: release.clone(),
    };
    let w = world_paying_through(EngineConfig::default(), Vec::new(), move |inner| {
        Arc::new(GatedProcessor { inner, entered, release }) as Arc<dyn PaymentProcessor>
    });
    (w, gate)
}

fn world_with(config: EngineConfig) -> World {
    world_paying_through(config, Vec::new(), |mock| mock as Arc<dyn PaymentProcessor>)
}

fn world_paying_through(
    config: EngineConfig,
    blackouts: Vec<CourtBlackout>,
    payments: impl FnOnce(Arc<MockPaymentProcessor>) -> Arc<dyn PaymentProcessor>,
) -> World {
    // Sunday morning; the test slots are on Monday.
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()));
    let club_id = Uuid::new_v4();
    let court = Court {
        id: Uuid::new_v4(),
        club_id,
        name: "Court C".to_string(),
        surface_type: SurfaceType::Crystal,
        has_lighting: true,
        lighting_surcharge_cents: 400,
        is_active: true,
        operating_hours: OperatingHours::daily(t(7), t(23)),
        blackouts,
    };
    let rules = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
    .into_iter()
    .map(|weekday| PricingRule {
        id: Uuid::new_v4(),
        club_id,
        label: "standard".to_string(),
        weekday,
        start_time: t(7),
        end_time: t(23),
        price_per_hour_cents: 3100,
    })
    .collect();

    let rackets = Uuid::new_v4();
    let mut equipment = EquipmentInventory::new();
    equipment.stock(EquipmentItem {
        id: rackets,
        club_id,
        name: "Racket".to_string(),
        item_type: ItemType::Racket,
        rental_price_cents: 300,
        total_quantity: 4,
        available_quantity: 0,
        reserved_quantity: 0,
    });

    let sink = Arc::new(RecordingSink::new());
    let processor = Arc::new(MockPaymentProcessor::new());
    let engine = BookingOrchestrator::new(EngineDeps {
        config,
        clock: clock.clone(),
        courts: Arc::new(InMemoryCourtDirectory::new(vec![court.clone()])),
        pricing: PricingEngine::new(PricingConfig::default(), rules).unwrap(),
        equipment,
        payments: payments(processor.clone()),
        events: sink.clone(),
    });

    World {
        engine,
        clock,
        sink,
        processor,
        court,
        rackets,
    }
}

fn world() -> World {
    world_with(EngineConfig::default())
}

fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
}

fn slot(from: DateTime<Utc>, minutes: i64) -> TimeRange {
    TimeRange::starting_at(from, Duration::minutes(minutes)).unwrap()
}

fn request(w: &World, range: TimeRange, initiator: PlayerId) -> BookingRequest {
    BookingRequest {
        court_id: w.court.id,
        range,
        initiator,
        initiator_skill: None,
        mode: BookingMode::InviteOnly,
        capacity: 4,
        invitees: Vec::new(),
        equipment: Vec::new(),
        custom_split: None,
        payment_methods: HashMap::new(),
    }
}

fn cards(players: &[PlayerId], token: &str) -> HashMap<PlayerId, PaymentMethod> {
    players.iter().map(|p| (*p, PaymentMethod::card(token))).collect()
}

async fn wait_for_promotion(w: &World, entry_id: Uuid) -> WaitlistStatus {
    for _ in 0..100 {
        let status = w.engine.waitlist().get(&entry_id).map(|e| e.status);
        if status == Some(WaitlistStatus::Promoted) {
            return WaitlistStatus::Promoted;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    w.engine
        .waitlist()
        .get(&entry_id)
        .map(|e| e.status)
        .unwrap_or(WaitlistStatus::Cancelled)
}

#[tokio::test]
async fn three_way_split_confirms_with_remainder_on_initiator() {
    let w = world();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let range = slot(monday(10, 0), 60);

    let booking = w
        .engine
        .request_booking(request(&w, range, a), None)
        .await
        .unwrap()
        .booking;
    assert_eq!(booking.status, BookingStatus::Held);

    for player in [b, c] {
        w.engine
            .add_participant(&booking.id, Actor::Player(a), Invitee { player_id: player, skill_level: None })
            .unwrap();
    }

    let confirmed = w.engine.submit_payment(booking.id, cards(&[a, b, c], "tok_visa")).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    let shares: HashMap<PlayerId, i64> = confirmed
        .participants
        .iter()
        .map(|p| (p.player_id, p.amount_owed_cents))
        .collect();
    assert_eq!(shares[&a], 1034);
    assert_eq!(shares[&b], 1033);
    assert_eq!(shares[&c], 1033);
    assert_eq!(shares.values().sum::<i64>(), confirmed.total_price_cents);

    assert!(!w.engine.ledger().is_available(w.court.id, &range));
    assert_eq!(w.engine.ledger().confirmed_claims(w.court.id), vec![(booking.id, range)]);
    assert!(w.sink.topics().contains(&"booking.confirmed"));
}

#[tokio::test]
async fn overlapping_request_conflicts() {
    let w = world();
    w.engine
        .request_booking(request(&w, slot(monday(10, 0), 60), Uuid::new_v4()), None)
        .await
        .unwrap();

    let err = w
        .engine
        .request_booking(request(&w, slot(monday(10, 30), 60), Uuid::new_v4()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SlotConflict { .. }));

    // Adjacent slot is free.
    w.engine
        .request_booking(request(&w, slot(monday(11, 0), 60), Uuid::new_v4()), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_hold_promotes_waitlist() {
    let w = world();
    let range = slot(monday(10, 0), 60);
    let booking = w
        .engine
        .request_booking(request(&w, range, Uuid::new_v4()), None)
        .await
        .unwrap()
        .booking;

    let waiting = Uuid::new_v4();
    let entry = w
        .engine
        .enqueue_waitlist(WaitlistRequest {
            court_id: w.court.id,
            range,
            player_id: waiting,
            skill_level: None,
            mode: BookingMode::InviteOnly,
            capacity: 2,
        })
        .await
        .unwrap();

    w.clock.advance(w.engine.config().hold_ttl());
    let report = w.engine.sweep().await;
    assert_eq!(report.expired, vec![booking.id]);
    assert_eq!(w.engine.get_booking(&booking.id).unwrap().status, BookingStatus::Expired);

    assert_eq!(wait_for_promotion(&w, entry.id).await, WaitlistStatus::Promoted);
    let promoted = w.engine.waitlist().get(&entry.id).unwrap();
    let new_booking = w.engine.get_booking(&promoted.promoted_booking.unwrap()).unwrap();
    assert_eq!(new_booking.initiator, waiting);
    assert_eq!(new_booking.status, BookingStatus::Held);
    assert_eq!(new_booking.range, range);

    let topics = w.sink.topics();
    assert!(topics.contains(&"booking.expired"));
    assert!(topics.contains(&"waitlist.promoted"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_open_seat_race_has_one_winner() {
    let w = world();
    let mut req = request(&w, slot(monday(18, 0), 90), Uuid::new_v4());
    req.mode = BookingMode::OpenGame;
    req.capacity = 2;
    let game = w.engine.request_booking(req, None).await.unwrap().booking;

    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = w.engine.clone();
            let barrier = barrier.clone();
            let id = game.id;
            tokio::spawn(async move {
                barrier.wait().await;
                engine.join_open_game(&id, Uuid::new_v4(), None).await
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(BookingError::Full))));

    assert_eq!(w.engine.get_booking(&game.id).unwrap().participants.len(), 2);
    assert_eq!(w.engine.list_open_games(&OpenGameFilter::default()).count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_requests_single_winner() {
    let w = world();
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let engine = w.engine.clone();
            let req = request(&w, slot(monday(14, (i % 4) * 10), 60), Uuid::new_v4());
            tokio::spawn(async move { engine.request_booking(req, None).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert!(matches!(err, BookingError::SlotConflict { .. })),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idempotent_retry_creates_one_booking() {
    let w = world();
    let initiator = Uuid::new_v4();
    let range = slot(monday(12, 0), 60);

    // A failed first attempt records nothing under the key.
    let mut broken = request(&w, range, initiator);
    broken.equipment.push(EquipmentRequest {
        equipment_id: Uuid::new_v4(),
        quantity: 1,
        renter: None,
    });
    assert!(w
        .engine
        .request_booking(broken, Some("req-42".to_string()))
        .await
        .is_err());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = w.engine.clone();
            let req = request(&w, range, initiator);
            tokio::spawn(async move { engine.request_booking(req, Some("req-42".to_string())).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().booking.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(w.sink.topics().iter().filter(|t| **t == "booking.created").count(), 1);
}

#[tokio::test]
async fn waitlist_promotes_in_fifo_order_skipping_cancelled() {
    let w = world();
    let range = slot(monday(16, 0), 60);
    let owner = Uuid::new_v4();
    let booking = w
        .engine
        .request_booking(request(&w, range, owner), None)
        .await
        .unwrap()
        .booking;

    let mut entries = Vec::new();
    for _ in 0..3 {
        let entry = w
            .engine
            .enqueue_waitlist(WaitlistRequest {
                court_id: w.court.id,
                range,
                player_id: Uuid::new_v4(),
                skill_level: None,
                mode: BookingMode::InviteOnly,
                capacity: 4,
            })
            .await
            .unwrap();
        entries.push(entry);
        w.clock.advance(Duration::seconds(1));
    }
    w.engine
        .cancel_waitlist(&entries[0].id, Actor::Player(entries[0].player_id))
        .unwrap();

    w.engine.cancel(&booking.id, Actor::Player(owner)).await.unwrap();

    assert_eq!(wait_for_promotion(&w, entries[1].id).await, WaitlistStatus::Promoted);
    assert_eq!(w.engine.waitlist().get(&entries[0].id).unwrap().status, WaitlistStatus::Cancelled);
    assert_eq!(w.engine.waitlist().get(&entries[2].id).unwrap().status, WaitlistStatus::Queued);
}

#[tokio::test]
async fn partial_decline_keeps_booking_held_for_retry() {
    let w = world();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let mut req = request(&w, slot(monday(10, 0), 60), a);
    req.invitees.push(Invitee { player_id: b, skill_level: None });
    let booking = w.engine.request_booking(req, None).await.unwrap().booking;

    let mut methods = cards(&[a, b], "tok_visa");
    methods.insert(b, PaymentMethod::card("tok_decline"));
    let err = w.engine.submit_payment(booking.id, methods).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::PaymentDeclined { .. } | BookingError::PartialAuthorizationFailure { .. }
    ));

    let after = w.engine.get_booking(&booking.id).unwrap();
    assert_eq!(after.status, BookingStatus::AwaitingPayment);
    assert_eq!(after.payment_attempts, 1);
    assert!(after.payment.is_none());
    assert!(w.sink.topics().contains(&"payment.failed"));

    let confirmed = w.engine.submit_payment(booking.id, cards(&[a, b], "tok_visa")).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn equipment_is_charged_to_renter_and_released_on_cancel() {
    let w = world();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let mut req = request(&w, slot(monday(10, 0), 60), a);
    req.invitees.push(Invitee { player_id: b, skill_level: None });
    req.equipment.push(EquipmentRequest {
        equipment_id: w.rackets,
        quantity: 2,
        renter: Some(b),
    });
    let booking = w.engine.request_booking(req, None).await.unwrap().booking;
    assert_eq!(booking.total_price_cents, 3100 + 600);
    assert_eq!(w.engine.equipment_item(&w.rackets).unwrap().available_quantity, 2);

    w.engine.cancel(&booking.id, Actor::Player(a)).await.unwrap();
    assert_eq!(w.engine.equipment_item(&w.rackets).unwrap().available_quantity, 4);
}

#[tokio::test]
async fn rented_equipment_returns_to_stock_when_booking_completes() {
    let w = world();
    let a = Uuid::new_v4();
    let mut req = request(&w, slot(monday(10, 0), 60), a);
    req.equipment.push(EquipmentRequest {
        equipment_id: w.rackets,
        quantity: 4,
        renter: None,
    });
    req.payment_methods = cards(&[a], "tok_visa");
    let booking = w.engine.request_booking(req, None).await.unwrap().booking;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(w.engine.equipment_item(&w.rackets).unwrap().available_quantity, 0);

    w.clock.set(booking.range.end);
    let report = w.engine.sweep().await;
    assert_eq!(report.completed, vec![booking.id]);
    assert_eq!(w.engine.equipment_item(&w.rackets).unwrap().available_quantity, 4);
    assert!(w.engine.get_booking(&booking.id).unwrap().equipment_returned);

    // The next day's rental finds the stock again.
    let b = Uuid::new_v4();
    let mut next = request(&w, slot(monday(10, 0) + Duration::days(1), 60), b);
    next.equipment.push(EquipmentRequest {
        equipment_id: w.rackets,
        quantity: 1,
        renter: None,
    });
    w.engine.request_booking(next, None).await.unwrap();
    assert_eq!(w.engine.equipment_item(&w.rackets).unwrap().available_quantity, 3);
}

#[tokio::test]
async fn staff_return_writes_off_damaged_equipment() {
    let w = world();
    let a = Uuid::new_v4();
    let mut req = request(&w, slot(monday(10, 0), 60), a);
    req.equipment.push(EquipmentRequest {
        equipment_id: w.rackets,
        quantity: 2,
        renter: None,
    });
    req.payment_methods = cards(&[a], "tok_visa");
    let booking = w.engine.request_booking(req, None).await.unwrap().booking;

    let err = w
        .engine
        .return_equipment(&booking.id, Actor::Player(a), &[])
        .unwrap_err();
    assert!(matches!(err, BookingError::NotAuthorized(_)));

    let staff = Actor::Staff(Uuid::new_v4());
    let returned = w.engine.return_equipment(&booking.id, staff, &[w.rackets]).unwrap();
    assert!(returned.equipment_returned);
    let rackets = w.engine.equipment_item(&w.rackets).unwrap();
    assert_eq!(rackets.total_quantity, 2);
    assert_eq!(rackets.available_quantity, 2);

    // Completion does not put the written-off rackets back.
    w.clock.set(booking.range.end);
    w.engine.sweep().await;
    assert_eq!(w.engine.equipment_item(&w.rackets).unwrap().available_quantity, 2);
    assert!(matches!(
        w.engine.return_equipment(&booking.id, staff, &[]),
        Err(BookingError::InvalidState(BookingStatus::Completed))
    ));
}

#[tokio::test]
async fn confirmed_cancellation_refunds_by_notice_window() {
    let config = EngineConfig {
        refund_policy: RefundPolicy {
            tiers: vec![
                RefundTier { min_notice_hours: 48, refund_percent: 100 },
                RefundTier { min_notice_hours: 24, refund_percent: 50 },
            ],
        },
        ..EngineConfig::default()
    };
    let w = world_with(config);
    let a = Uuid::new_v4();
    let mut req = request(&w, slot(monday(10, 0), 60), a);
    req.payment_methods = cards(&[a], "tok_visa");
    let booking = w.engine.request_booking(req, None).await.unwrap().booking;
    assert_eq!(booking.status, BookingStatus::Confirmed);

    // 25 hours before the start.
    let outcome = w.engine.cancel(&booking.id, Actor::Player(a)).await.unwrap();
    let refund = outcome.refund.unwrap();
    assert_eq!(refund.refund_percent, 50);
    assert_eq!(refund.total_refunded_cents(), 1550);
    assert_eq!(w.processor.refunded_cents(), 1550);
    assert!(!outcome.booking.refund_pending);
    assert!(w.engine.ledger().is_available(w.court.id, &booking.range));
}

#[tokio::test]
async fn failed_refund_flags_booking() {
    let config = EngineConfig {
        refund_policy: RefundPolicy {
            tiers: vec![RefundTier { min_notice_hours: 0, refund_percent: 100 }],
        },
        ..EngineConfig::default()
    };
    let w = world_with(config);
    let a = Uuid::new_v4();
    let mut req = request(&w, slot(monday(10, 0), 60), a);
    req.payment_methods = cards(&[a], "tok_refund_fail");
    let booking = w.engine.request_booking(req, None).await.unwrap().booking;

    let outcome = w.engine.cancel(&booking.id, Actor::Player(a)).await.unwrap();
    assert_eq!(outcome.booking.status, BookingStatus::Cancelled);
    assert!(outcome.booking.refund_pending);
    assert_eq!(outcome.refund.unwrap().failed, vec![a]);

    let topics = w.sink.topics();
    assert!(topics.contains(&"payment.failed"));
    assert!(topics.contains(&"booking.cancelled"));
    assert!(w.engine.ledger().is_available(w.court.id, &booking.range));
}

#[tokio::test]
async fn open_game_waits_for_players_until_grace() {
    let w = world();
    let host = Uuid::new_v4();
    let mut req = request(&w, slot(monday(19, 0), 90), host);
    req.mode = BookingMode::OpenGame;
    req.initiator_skill = Some(3.0);
    let game = w.engine.request_booking(req, None).await.unwrap().booking;
    // Lit court after 19:00: 1.5h at 3100 plus the surcharge.
    assert_eq!(game.total_price_cents, 4650 + 400);

    let err = w.engine.submit_payment(game.id, cards(&[host], "tok_visa")).await.unwrap_err();
    assert!(matches!(err, BookingError::NotReady(_)));

    let joined = w.engine.join_open_game(&game.id, Uuid::new_v4(), Some(5.0)).await.unwrap();
    assert!(joined.skill_warning.is_some());

    w.clock.advance(w.engine.config().open_game_grace());
    let report = w.engine.sweep().await;
    assert_eq!(report.awaiting_payment, vec![game.id]);

    let players: Vec<PlayerId> = joined.booking.participants.iter().map(|p| p.player_id).collect();
    let confirmed = w.engine.submit_payment(game.id, cards(&players, "tok_visa")).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.participants.len(), 2);
}

#[tokio::test]
async fn fixed_split_booking_refuses_extra_players() {
    let w = world();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let mut req = request(&w, slot(monday(10, 0), 60), a);
    req.invitees = vec![Invitee { player_id: b, skill_level: None }];
    req.custom_split = Some([(a, 2100), (b, 1000)].into_iter().collect());
    let booking = w.engine.request_booking(req, None).await.unwrap().booking;

    let err = w
        .engine
        .add_participant(&booking.id, Actor::Player(a), Invitee { player_id: Uuid::new_v4(), skill_level: None })
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidRequest(_)));
    assert_eq!(w.engine.get_booking(&booking.id).unwrap().participants.len(), 2);

    let confirmed = w.engine.submit_payment(booking.id, cards(&[a, b], "tok_visa")).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(w.processor.refunded_cents(), 0);
}

#[tokio::test]
async fn cancel_during_payment_refunds_the_capture() {
    let (w, gate) = gated_world();
    let a = Uuid::new_v4();
    let booking = w
        .engine
        .request_booking(request(&w, slot(monday(10, 0), 60), a), None)
        .await
        .unwrap()
        .booking;

    let engine = w.engine.clone();
    let id = booking.id;
    let payment = tokio::spawn(async move { engine.submit_payment(id, cards(&[a], "tok_visa")).await });
    gate.entered.notified().await;

    let cancelled = w.engine.cancel(&booking.id, Actor::Player(a)).await.unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    assert!(cancelled.refund.is_none());

    gate.release.notify_one();
    let err = payment.await.unwrap().unwrap_err();
    assert!(matches!(err, BookingError::InvalidState(BookingStatus::Cancelled)));

    let booking = w.engine.get_booking(&booking.id).unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert!(booking
        .participants
        .iter()
        .all(|p| p.payment_status == ParticipantPaymentStatus::Refunded));
    assert_eq!(w.processor.refunded_cents(), booking.total_price_cents);
    assert!(!w.sink.topics().contains(&"booking.confirmed"));
    assert!(w.engine.ledger().is_available(w.court.id, &booking.range));
}

#[tokio::test]
async fn hold_lapsing_during_payment_refunds_and_frees_slot() {
    let (w, gate) = gated_world();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let range = slot(monday(10, 0), 60);
    let booking = w.engine.request_booking(request(&w, range, a), None).await.unwrap().booking;

    let engine = w.engine.clone();
    let id = booking.id;
    let payment = tokio::spawn(async move { engine.submit_payment(id, cards(&[a], "tok_visa")).await });
    gate.entered.notified().await;

    w.clock.advance(w.engine.config().hold_ttl() + Duration::minutes(1));
    let rival = w.engine.request_booking(request(&w, range, b), None).await.unwrap().booking;
    assert_eq!(rival.status, BookingStatus::Held);

    gate.release.notify_one();
    let err = payment.await.unwrap().unwrap_err();
    assert!(matches!(err, BookingError::HoldExpired(bid) if bid == booking.id));

    let lapsed = w.engine.get_booking(&booking.id).unwrap();
    assert_eq!(lapsed.status, BookingStatus::Expired);
    assert_eq!(w.processor.refunded_cents(), lapsed.total_price_cents);

    // The rival keeps the slot.
    assert_eq!(w.engine.get_booking(&rival.id).unwrap().status, BookingStatus::Held);
    assert!(!w.engine.ledger().is_available(w.court.id, &range));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_join_leaves_no_open_game() {
    let w = world();
    let (host, joiner) = (Uuid::new_v4(), Uuid::new_v4());
    let mut req = request(&w, slot(monday(18, 0), 90), host);
    req.mode = BookingMode::OpenGame;
    let game = w.engine.request_booking(req, None).await.unwrap().booking;

    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let join = {
        let engine = w.engine.clone();
        let barrier = barrier.clone();
        let id = game.id;
        tokio::spawn(async move {
            barrier.wait().await;
            engine.join_open_game(&id, joiner, None).await
        })
    };
    let cancel = {
        let engine = w.engine.clone();
        let barrier = barrier.clone();
        let id = game.id;
        tokio::spawn(async move {
            barrier.wait().await;
            engine.cancel(&id, Actor::Player(host)).await
        })
    };

    let joined = join.await.unwrap();
    assert!(cancel.await.unwrap().is_ok());

    let game = w.engine.get_booking(&game.id).unwrap();
    assert_eq!(game.status, BookingStatus::Cancelled);
    assert_eq!(game.participant(&joiner).is_some(), joined.is_ok());
    assert_eq!(w.engine.list_open_games(&OpenGameFilter::default()).count(), 0);
}

#[tokio::test]
async fn blackout_window_cannot_be_booked() {
    let blackout = CourtBlackout {
        range: TimeRange::new(monday(12, 0), monday(14, 0)).unwrap(),
        reason: Some("tournament".to_string()),
    };
    let w = world_paying_through(EngineConfig::default(), vec![blackout], |mock| {
        mock as Arc<dyn PaymentProcessor>
    });
    let a = Uuid::new_v4();

    let err = w
        .engine
        .request_booking(request(&w, slot(monday(13, 0), 60), a), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidRequest(_)));
    assert!(w.sink.topics().is_empty());

    let after = w.engine.request_booking(request(&w, slot(monday(14, 0), 60), a), None).await;
    assert!(after.is_ok());

    let grid = w
        .engine
        .availability(w.court.club_id, monday(0, 0).date_naive(), None)
        .await
        .unwrap();
    let open: Vec<(u32, bool)> = grid.courts[0]
        .slots
        .iter()
        .map(|s| (s.range.start.format("%H%M").to_string().parse().unwrap(), s.available))
        .collect();
    // 90 minute slots from 07:00
    assert!(open.contains(&(1000, true)));
    assert!(open.contains(&(1130, false)));
    assert!(open.contains(&(1300, false)));
}

#[tokio::test]
async fn weekly_limit_counts_active_bookings_per_player() {
    let w = world_with(EngineConfig {
        max_bookings_per_player_per_week: Some(2),
        ..EngineConfig::default()
    });
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let first = w.engine.request_booking(request(&w, slot(monday(8, 0), 60), a), None).await.unwrap().booking;
    w.engine.request_booking(request(&w, slot(monday(10, 0), 60), a), None).await.unwrap();

    let err = w
        .engine
        .request_booking(request(&w, slot(monday(12, 0), 60), a), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::LimitReached(_)));

    // Someone else, and the following week, are unaffected.
    assert!(w.engine.request_booking(request(&w, slot(monday(12, 0), 60), b), None).await.is_ok());
    let next_week = slot(monday(10, 0) + Duration::days(7), 60);
    assert!(w.engine.request_booking(request(&w, next_week, a), None).await.is_ok());

    // A cancelled booking stops counting.
    w.engine.cancel(&first.id, Actor::Player(a)).await.unwrap();
    assert!(w.engine.request_booking(request(&w, slot(monday(14, 0), 60), a), None).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn weekly_limit_holds_under_concurrent_requests() {
    let w = world_with(EngineConfig {
        max_bookings_per_player_per_week: Some(2),
        ..EngineConfig::default()
    });
    let a = Uuid::new_v4();
    let barrier = Arc::new(tokio::sync::Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let engine = w.engine.clone();
            let barrier = barrier.clone();
            let req = request(&w, slot(monday(8 + i * 2, 0), 60), a);
            tokio::spawn(async move {
                barrier.wait().await;
                engine.request_booking(req, None).await
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(err) => assert!(matches!(err, BookingError::LimitReached(_))),
        }
    }
    assert_eq!(admitted, 2);
}
