use chrono::{DateTime, Duration, Utc};
use courtside_core::{BookingId, Clock, CourtId, TimeRange};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Proof that a booking holds a court range. Needed to confirm, move or
/// release the claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldToken {
    pub token_id: Uuid,
    pub booking_id: BookingId,
    pub court_id: CourtId,
    pub range: TimeRange,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Court {court_id} is already claimed for part of {range}")]
    SlotConflict { court_id: CourtId, range: TimeRange },

    #[error("Hold for booking {0} has expired")]
    HoldExpired(BookingId),

    #[error("Range {0} ends before it starts")]
    InvalidRange(TimeRange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    Held { expires_at: DateTime<Utc> },
    Confirmed,
}

#[derive(Debug, Clone)]
struct Claim {
    token_id: Uuid,
    booking_id: BookingId,
    range: TimeRange,
    state: ClaimState,
}

impl Claim {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            ClaimState::Held { expires_at } => expires_at > now,
            ClaimState::Confirmed => true,
        }
    }
}

/// Claims on one court keyed by start time. Live claims never overlap, so
/// at most one claim starting before a range can reach into it.
#[derive(Debug, Default)]
struct CourtCalendar {
    claims: BTreeMap<DateTime<Utc>, Claim>,
}

impl CourtCalendar {
    fn overlapping(&self, range: &TimeRange) -> Vec<DateTime<Utc>> {
        // An empty or inverted range overlaps nothing.
        if !range.is_valid() {
            return Vec::new();
        }
        let before = self
            .claims
            .range(..range.start)
            .next_back()
            .filter(|(_, c)| c.range.end > range.start)
            .map(|(start, _)| *start);
        before
            .into_iter()
            .chain(self.claims.range(range.start..range.end).map(|(start, _)| *start))
            .collect()
    }

    /// Drop expired holds in the way, then report whether a live claim other
    /// than `ignore` still overlaps.
    fn clear_for(&mut self, range: &TimeRange, now: DateTime<Utc>, ignore: Option<Uuid>) -> bool {
        for start in self.overlapping(range) {
            let Some(claim) = self.claims.get(&start) else {
                continue;
            };
            if Some(claim.token_id) == ignore {
                continue;
            }
            if claim.is_live(now) {
                return false;
            }
            self.claims.remove(&start);
        }
        true
    }

    fn take(&mut self, token: &HoldToken) -> Option<Claim> {
        let matches = self
            .claims
            .get(&token.range.start)
            .is_some_and(|c| c.token_id == token.token_id);
        if matches {
            self.claims.remove(&token.range.start)
        } else {
            None
        }
    }
}

/// Authoritative record of which court ranges are claimed.
///
/// Each court has its own calendar behind its own mutex; operations on
/// different courts never contend. Hold expiry is evaluated against the shared
/// clock on every access, so an expired hold stops blocking a slot even if the
/// sweeper has not run yet.
pub struct SlotLedger {
    clock: Arc<dyn Clock>,
    courts: RwLock<HashMap<CourtId, Arc<Mutex<CourtCalendar>>>>,
}

impl SlotLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            courts: RwLock::new(HashMap::new()),
        }
    }

    fn calendar(&self, court_id: CourtId) -> Arc<Mutex<CourtCalendar>> {
        if let Some(calendar) = self.courts.read().get(&court_id) {
            return calendar.clone();
        }
        self.courts.write().entry(court_id).or_default().clone()
    }

    /// Atomically claim `range` on `court_id` for `ttl`.
    pub fn try_hold(
        &self,
        booking_id: BookingId,
        court_id: CourtId,
        range: TimeRange,
        ttl: Duration,
    ) -> Result<HoldToken, LedgerError> {
        if !range.is_valid() {
            return Err(LedgerError::InvalidRange(range));
        }
        let calendar = self.calendar(court_id);
        let mut calendar = calendar.lock();
        let now = self.clock.now();

        if !calendar.clear_for(&range, now, None) {
            return Err(LedgerError::SlotConflict { court_id, range });
        }

        let token = HoldToken {
            token_id: Uuid::new_v4(),
            booking_id,
            court_id,
            range,
            expires_at: now + ttl,
        };
        calendar.claims.insert(
            range.start,
            Claim {
                token_id: token.token_id,
                booking_id,
                range,
                state: ClaimState::Held {
                    expires_at: token.expires_at,
                },
            },
        );
        tracing::debug!(%court_id, %range, %booking_id, "slot held");
        Ok(token)
    }

    /// Turn a live hold into a permanent claim. Confirming twice is a no-op.
    pub fn confirm(&self, token: &HoldToken) -> Result<(), LedgerError> {
        let calendar = self.calendar(token.court_id);
        let mut calendar = calendar.lock();
        let now = self.clock.now();

        let Some(claim) = calendar.claims.get_mut(&token.range.start) else {
            return Err(LedgerError::HoldExpired(token.booking_id));
        };
        if claim.token_id != token.token_id {
            return Err(LedgerError::HoldExpired(token.booking_id));
        }
        if !claim.is_live(now) {
            calendar.claims.remove(&token.range.start);
            return Err(LedgerError::HoldExpired(token.booking_id));
        }
        claim.state = ClaimState::Confirmed;
        Ok(())
    }

    /// Free the claim behind `token`. Releasing an unknown or already released
    /// token does nothing.
    pub fn release(&self, token: &HoldToken) -> bool {
        let calendar = self.calendar(token.court_id);
        let released = calendar.lock().take(token).is_some();
        if released {
            tracing::debug!(court_id = %token.court_id, range = %token.range, "slot released");
        }
        released
    }

    /// Move a claim to another range, possibly on another court, keeping its
    /// state. On the same court the move is a single step; across courts the
    /// new range is claimed before the old one is let go.
    pub fn relocate(
        &self,
        token: &HoldToken,
        court_id: CourtId,
        range: TimeRange,
    ) -> Result<HoldToken, LedgerError> {
        if !range.is_valid() {
            return Err(LedgerError::InvalidRange(range));
        }
        let now = self.clock.now();
        let moved = HoldToken {
            token_id: Uuid::new_v4(),
            court_id,
            range,
            ..token.clone()
        };

        if court_id == token.court_id {
            let calendar = self.calendar(court_id);
            let mut calendar = calendar.lock();
            if !calendar.clear_for(&range, now, Some(token.token_id)) {
                return Err(LedgerError::SlotConflict { court_id, range });
            }
            let mut claim = calendar
                .take(token)
                .ok_or(LedgerError::HoldExpired(token.booking_id))?;
            claim.token_id = moved.token_id;
            claim.range = range;
            calendar.claims.insert(range.start, claim);
            return Ok(moved);
        }

        let state = {
            let source = self.calendar(token.court_id);
            let source = source.lock();
            source
                .claims
                .get(&token.range.start)
                .filter(|c| c.token_id == token.token_id && c.is_live(now))
                .map(|c| c.state)
                .ok_or(LedgerError::HoldExpired(token.booking_id))?
        };

        {
            let target = self.calendar(court_id);
            let mut target = target.lock();
            if !target.clear_for(&range, now, None) {
                return Err(LedgerError::SlotConflict { court_id, range });
            }
            target.claims.insert(
                range.start,
                Claim {
                    token_id: moved.token_id,
                    booking_id: token.booking_id,
                    range,
                    state,
                },
            );
        }

        self.release(token);
        Ok(moved)
    }

    /// No live claim overlaps `range`.
    pub fn is_available(&self, court_id: CourtId, range: &TimeRange) -> bool {
        let calendar = self.calendar(court_id);
        let calendar = calendar.lock();
        let now = self.clock.now();
        calendar
            .overlapping(range)
            .iter()
            .filter_map(|start| calendar.claims.get(start))
            .all(|c| !c.is_live(now))
    }

    /// Live claimed ranges intersecting `window`, in start order.
    pub fn occupancy(&self, court_id: CourtId, window: &TimeRange) -> Vec<TimeRange> {
        let calendar = self.calendar(court_id);
        let calendar = calendar.lock();
        let now = self.clock.now();
        calendar
            .overlapping(window)
            .iter()
            .filter_map(|start| calendar.claims.get(start))
            .filter(|c| c.is_live(now))
            .map(|c| c.range)
            .collect()
    }

    /// Confirmed claims on a court, as `(booking, range)` pairs.
    pub fn confirmed_claims(&self, court_id: CourtId) -> Vec<(BookingId, TimeRange)> {
        let calendar = self.calendar(court_id);
        let calendar = calendar.lock();
        calendar
            .claims
            .values()
            .filter(|c| c.state == ClaimState::Confirmed)
            .map(|c| (c.booking_id, c.range))
            .collect()
    }

    /// Drop expired holds and claims that ended before `before`. Returns how
    /// many claims were removed.
    pub fn sweep_expired(&self, before: DateTime<Utc>) -> usize {
        let now = self.clock.now();
        let calendars: Vec<_> = self.courts.read().values().cloned().collect();
        calendars
            .iter()
            .map(|calendar| {
                let mut calendar = calendar.lock();
                let count = calendar.claims.len();
                calendar
                    .claims
                    .retain(|_, c| c.is_live(now) && c.range.end > before);
                count - calendar.claims.len()
            })
            .sum()
    }
}
