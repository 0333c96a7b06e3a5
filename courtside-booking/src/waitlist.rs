use chrono::{DateTime, Utc};
use courtside_core::{BookingId, ClubId, PlayerId, SlotKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use uuid::Uuid;

use crate::models::BookingMode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistStatus {
    Queued,
    Promoted,
    Expired,
    Cancelled,
}

/// A player waiting for a slot to free up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub player_id: PlayerId,
    pub club_id: ClubId,
    pub slot_key: SlotKey,
    /// Shape of the booking created on promotion.
    pub capacity: u8,
    pub mode: BookingMode,
    pub skill_level: Option<f32>,
    pub requested_at: DateTime<Utc>,
    pub status: WaitlistStatus,
    pub promoted_booking: Option<BookingId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitlistError {
    #[error("Waitlist entry not found: {0}")]
    NotFound(Uuid),

    #[error("Player {0} is already queued for this slot")]
    AlreadyQueued(PlayerId),

    #[error("Waitlist entry in status {0:?} cannot be cancelled")]
    NotCancellable(WaitlistStatus),

    #[error("Waitlist entry {0} was cancelled during promotion")]
    CancelledDuringPromotion(Uuid),
}

#[derive(Default)]
struct Queues {
    entries: HashMap<Uuid, WaitlistEntry>,
    by_slot: BTreeMap<SlotKey, BTreeSet<(DateTime<Utc>, Uuid)>>,
    /// Entries a promotion task is currently working on.
    in_flight: HashSet<Uuid>,
}

impl Queues {
    fn dequeue(&mut self, entry_id: &Uuid) {
        let Some(entry) = self.entries.get(entry_id) else {
            return;
        };
        let key = entry.slot_key;
        let position = (entry.requested_at, entry.id);
        if let Some(queue) = self.by_slot.get_mut(&key) {
            queue.remove(&position);
            if queue.is_empty() {
                self.by_slot.remove(&key);
            }
        }
    }
}

/// FIFO queues of players per slot key, ordered by request time with ties
/// broken by entry id.
#[derive(Default)]
pub struct WaitlistManager {
    queues: Mutex<Queues>,
}

impl WaitlistManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, mut entry: WaitlistEntry) -> Result<WaitlistEntry, WaitlistError> {
        let mut queues = self.queues.lock();
        let duplicate = queues.entries.values().any(|e| {
            e.player_id == entry.player_id && e.slot_key == entry.slot_key && e.status == WaitlistStatus::Queued
        });
        if duplicate {
            return Err(WaitlistError::AlreadyQueued(entry.player_id));
        }

        entry.status = WaitlistStatus::Queued;
        queues
            .by_slot
            .entry(entry.slot_key)
            .or_default()
            .insert((entry.requested_at, entry.id));
        queues.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    pub fn get(&self, entry_id: &Uuid) -> Option<WaitlistEntry> {
        self.queues.lock().entries.get(entry_id).cloned()
    }

    pub fn cancel(&self, entry_id: &Uuid) -> Result<WaitlistEntry, WaitlistError> {
        let mut queues = self.queues.lock();
        let status = queues
            .entries
            .get(entry_id)
            .map(|e| e.status)
            .ok_or(WaitlistError::NotFound(*entry_id))?;
        if status != WaitlistStatus::Queued {
            return Err(WaitlistError::NotCancellable(status));
        }

        queues.dequeue(entry_id);
        let entry = queues
            .entries
            .get_mut(entry_id)
            .ok_or(WaitlistError::NotFound(*entry_id))?;
        entry.status = WaitlistStatus::Cancelled;
        Ok(entry.clone())
    }

    /// Queued entries for any slot overlapping `freed`, in promotion order.
    /// Entries already being promoted are skipped.
    pub fn candidates(&self, freed: &SlotKey) -> Vec<WaitlistEntry> {
        let queues = self.queues.lock();
        let mut order: Vec<(DateTime<Utc>, Uuid)> = queues
            .by_slot
            .iter()
            .filter(|(key, _)| key.overlaps(freed))
            .flat_map(|(_, queue)| queue.iter().copied())
            .filter(|(_, id)| !queues.in_flight.contains(id))
            .collect();
        order.sort();
        order
            .into_iter()
            .filter_map(|(_, id)| queues.entries.get(&id).cloned())
            .collect()
    }

    /// Mark an entry as being promoted. Fails if it is no longer queued or
    /// another task already has it.
    pub fn claim(&self, entry_id: &Uuid) -> bool {
        let mut queues = self.queues.lock();
        let queued = queues
            .entries
            .get(entry_id)
            .is_some_and(|e| e.status == WaitlistStatus::Queued);
        queued && queues.in_flight.insert(*entry_id)
    }

    /// Promotion attempt failed; the entry keeps its place in the queue.
    pub fn release_claim(&self, entry_id: &Uuid) {
        self.queues.lock().in_flight.remove(entry_id);
    }

    /// Record a successful promotion. If the player cancelled the entry while
    /// the booking was being made, the caller must undo that booking.
    pub fn finish_promotion(&self, entry_id: &Uuid, booking_id: BookingId) -> Result<WaitlistEntry, WaitlistError> {
        let mut queues = self.queues.lock();
        queues.in_flight.remove(entry_id);
        let status = queues
            .entries
            .get(entry_id)
            .map(|e| e.status)
            .ok_or(WaitlistError::NotFound(*entry_id))?;
        if status != WaitlistStatus::Queued {
            return Err(WaitlistError::CancelledDuringPromotion(*entry_id));
        }

        queues.dequeue(entry_id);
        let entry = queues
            .entries
            .get_mut(entry_id)
            .ok_or(WaitlistError::NotFound(*entry_id))?;
        entry.status = WaitlistStatus::Promoted;
        entry.promoted_booking = Some(booking_id);
        Ok(entry.clone())
    }

    /// Expire queued entries whose slot has already started.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<WaitlistEntry> {
        let mut queues = self.queues.lock();
        let stale: Vec<Uuid> = queues
            .entries
            .values()
            .filter(|e| e.status == WaitlistStatus::Queued && e.slot_key.range.start <= now)
            .filter(|e| !queues.in_flight.contains(&e.id))
            .map(|e| e.id)
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for id in stale {
            queues.dequeue(&id);
            if let Some(entry) = queues.entries.get_mut(&id) {
                entry.status = WaitlistStatus::Expired;
                expired.push(entry.clone());
            }
        }
        expired
    }

    pub fn queued_len(&self, slot_key: &SlotKey) -> usize {
        self.queues.lock().by_slot.get(slot_key).map_or(0, |q| q.len())
    }
}
