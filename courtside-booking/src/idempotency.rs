use chrono::{DateTime, Duration, Utc};
use courtside_core::{BookingId, PlayerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type KeyCell = Arc<AsyncMutex<Option<BookingId>>>;

struct KeyEntry {
    cell: KeyCell,
    first_seen: DateTime<Utc>,
}

impl KeyEntry {
    /// Nobody is waiting on the key and its window has passed.
    fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        Arc::strong_count(&self.cell) == 1 && self.first_seen + ttl <= now
    }
}

/// Request-id deduplication for booking creation.
///
/// Keys are scoped to the initiating player, so two players sending the same
/// key never see each other's bookings. Concurrent requests with the same key
/// are serialized; once one of them succeeds, later ones get its booking id
/// back instead of creating another. A failed attempt records nothing, so the
/// caller may retry with the same key. Keys are forgotten `ttl` after first use.
pub struct IdempotencyGuard {
    ttl: Duration,
    keys: Mutex<HashMap<(PlayerId, String), KeyEntry>>,
}

pub struct IdempotencySlot {
    guard: OwnedMutexGuard<Option<BookingId>>,
}

impl IdempotencySlot {
    /// Booking already created under this key.
    pub fn existing(&self) -> Option<BookingId> {
        *self.guard
    }

    pub fn record(mut self, booking_id: BookingId) {
        *self.guard = Some(booking_id);
    }
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive use of `key` for this initiator.
    pub async fn acquire(&self, initiator: PlayerId, key: &str, now: DateTime<Utc>) -> IdempotencySlot {
        let cell = {
            let mut keys = self.keys.lock();
            let entry = keys.entry((initiator, key.to_string())).or_insert_with(|| KeyEntry {
                cell: KeyCell::default(),
                first_seen: now,
            });
            if entry.is_stale(now, self.ttl) {
                *entry = KeyEntry {
                    cell: KeyCell::default(),
                    first_seen: now,
                };
            }
            entry.cell.clone()
        };
        IdempotencySlot {
            guard: cell.lock_owned().await,
        }
    }

    /// Drop keys past their window. Returns how many were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut keys = self.keys.lock();
        let before = keys.len();
        keys.retain(|_, entry| !entry.is_stale(now, self.ttl));
        before - keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}
