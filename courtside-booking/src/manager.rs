use chrono::{DateTime, Utc};
use courtside_core::BookingId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BookingError, BookingResult};
use crate::models::{Booking, BookingStatus};

/// Live bookings, each behind its own lock.
///
/// The per-booking mutex is the serialization point for joins, payment
/// submission and cancellation of that booking. It may be held while taking a
/// court lock in the ledger, never the other way round, and never across an
/// await.
#[derive(Default)]
pub struct BookingStore {
    bookings: RwLock<HashMap<BookingId, Arc<Mutex<Booking>>>>,
}

impl BookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, booking: Booking) -> Arc<Mutex<Booking>> {
        let id = booking.id;
        let handle = Arc::new(Mutex::new(booking));
        self.bookings.write().insert(id, handle.clone());
        handle
    }

    /// Shared handle to a booking's lock.
    pub fn handle(&self, booking_id: &BookingId) -> BookingResult<Arc<Mutex<Booking>>> {
        self.bookings
            .read()
            .get(booking_id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("booking {}", booking_id)))
    }

    /// Snapshot of a booking.
    pub fn get(&self, booking_id: &BookingId) -> BookingResult<Booking> {
        Ok(self.handle(booking_id)?.lock().clone())
    }

    /// Run `f` under the booking's lock.
    pub fn update<R>(
        &self,
        booking_id: &BookingId,
        f: impl FnOnce(&mut Booking) -> BookingResult<R>,
    ) -> BookingResult<R> {
        let handle = self.handle(booking_id)?;
        let mut booking = handle.lock();
        f(&mut booking)
    }

    /// Ids of bookings matching `pred`. Each booking is locked only briefly.
    pub fn ids_where(&self, pred: impl Fn(&Booking) -> bool) -> Vec<BookingId> {
        let handles: Vec<_> = self.bookings.read().values().cloned().collect();
        handles
            .iter()
            .filter_map(|h| {
                let booking = h.lock();
                pred(&booking).then_some(booking.id)
            })
            .collect()
    }

    pub fn list(&self, pred: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let handles: Vec<_> = self.bookings.read().values().cloned().collect();
        let mut bookings: Vec<Booking> = handles
            .iter()
            .filter_map(|h| {
                let booking = h.lock();
                pred(&booking).then(|| booking.clone())
            })
            .collect();
        bookings.sort_by(|a, b| a.range.start.cmp(&b.range.start).then(a.id.cmp(&b.id)));
        bookings
    }

    pub fn len(&self) -> usize {
        self.bookings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply a lifecycle transition, rejecting moves the state machine forbids.
///
/// ```text
/// Held -> AwaitingPayment -> Confirmed -> Completed
///   \_________\______________\-> Cancelled
///    \_________\-> Expired
/// ```
pub fn transition(booking: &mut Booking, to: BookingStatus, now: DateTime<Utc>) -> BookingResult<()> {
    use BookingStatus::*;

    let allowed = match (booking.status, to) {
        (Held, AwaitingPayment) => true,
        (Held | AwaitingPayment, Confirmed) => true,
        (Held | AwaitingPayment, Expired) => true,
        (Held | AwaitingPayment | Confirmed, Cancelled) => true,
        (Confirmed, Completed) => true,
        _ => false,
    };
    if !allowed {
        return Err(BookingError::InvalidState(booking.status));
    }

    booking.update_status(to, now);
    match to {
        Confirmed => booking.confirmed_at = Some(now),
        Expired | Cancelled => booking.checkout_in_progress = false,
        _ => {}
    }
    Ok(())
}
