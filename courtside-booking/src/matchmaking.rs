use chrono::{DateTime, NaiveDate, Utc};
use courtside_core::{BookingId, ClubId};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};

use crate::error::{BookingError, BookingResult};
use crate::manager::BookingStore;
use crate::models::{Actor, Booking, JoinOutcome, Participant};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenGameFilter {
    pub club_id: Option<ClubId>,
    pub date: Option<NaiveDate>,
    /// Only games where everyone is within the club's allowed skill range of
    /// this level.
    pub skill_level: Option<f32>,
}

/// Snapshot of the open games matching a filter, taken when `list` was
/// called. Later joins do not change what it yields.
pub struct OpenGames {
    games: std::vec::IntoIter<Booking>,
}

impl Iterator for OpenGames {
    type Item = Booking;

    fn next(&mut self) -> Option<Booking> {
        self.games.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.games.size_hint()
    }
}

impl ExactSizeIterator for OpenGames {}

/// Index of joinable bookings, ordered by start time.
#[derive(Default)]
pub struct OpenGameRegistry {
    index: RwLock<Index>,
}

#[derive(Default)]
struct Index {
    by_start: BTreeSet<(DateTime<Utc>, BookingId)>,
    starts: HashMap<BookingId, DateTime<Utc>>,
}

impl OpenGameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, booking: &Booking) {
        let mut index = self.index.write();
        if let Some(previous) = index.starts.insert(booking.id, booking.range.start) {
            index.by_start.remove(&(previous, booking.id));
        }
        index.by_start.insert((booking.range.start, booking.id));
    }

    pub fn unindex(&self, booking_id: &BookingId) {
        let mut index = self.index.write();
        if let Some(start) = index.starts.remove(booking_id) {
            index.by_start.remove(&(start, *booking_id));
        }
    }

    pub fn contains(&self, booking_id: &BookingId) -> bool {
        self.index.read().starts.contains_key(booking_id)
    }

    /// Joinable games matching `filter`, earliest first.
    pub fn list(&self, store: &BookingStore, filter: &OpenGameFilter, skill_range_allowed: f32) -> OpenGames {
        let ids: Vec<BookingId> = self.index.read().by_start.iter().map(|(_, id)| *id).collect();

        let games: Vec<Booking> = ids
            .iter()
            .filter_map(|id| store.get(id).ok())
            .filter(|b| b.accepts_joiners())
            .filter(|b| filter.club_id.map_or(true, |club| b.club_id == club))
            .filter(|b| filter.date.map_or(true, |date| b.range.date() == date))
            .filter(|b| {
                filter
                    .skill_level
                    .map_or(true, |level| b.skill_compatible(level, skill_range_allowed))
            })
            .collect();

        OpenGames {
            games: games.into_iter(),
        }
    }

    /// Add a player to an open game. The capacity check and the insert happen
    /// under the booking's lock, so racing joiners for the last seat produce
    /// exactly one winner; the game leaves the listing in the same step.
    pub fn join(
        &self,
        store: &BookingStore,
        booking_id: &BookingId,
        participant: Participant,
        skill_range_allowed: f32,
    ) -> BookingResult<JoinOutcome> {
        let actor = Actor::Player(participant.player_id);
        let outcome = store.update(booking_id, |booking| {
            let skill_warning = booking
                .add_participant(actor, participant, skill_range_allowed)
                .map_err(|e| match e {
                    BookingError::NotOpen => BookingError::ClosedOrAlreadyConfirmed,
                    other => other,
                })?;
            if booking.is_full() {
                self.unindex(&booking.id);
            }
            Ok(JoinOutcome {
                booking: booking.clone(),
                skill_warning,
            })
        })?;

        tracing::info!(
            booking_id = %booking_id,
            participants = outcome.booking.participants.len(),
            capacity = outcome.booking.capacity,
            "player joined open game"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingMode, BookingStatus};
    use chrono::{Duration, TimeZone};
    use courtside_core::{PlayerId, TimeRange};
    use std::sync::Arc;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn open_game(club_id: ClubId, days_ahead: i64, capacity: u8, skill: f32) -> Booking {
        let range = TimeRange::starting_at(now() + Duration::days(days_ahead), Duration::minutes(90)).unwrap();
        Booking::new(
            club_id,
            Uuid::new_v4(),
            range,
            BookingMode::OpenGame,
            capacity,
            Participant::new(Uuid::new_v4(), Some(skill), now()),
            6000,
            "GBP",
            now(),
        )
    }

    fn player(id: PlayerId) -> Participant {
        Participant::new(id, None, now())
    }

    #[test]
    fn test_list_filters_and_orders() {
        let store = BookingStore::new();
        let registry = OpenGameRegistry::new();
        let club = Uuid::new_v4();

        let later = open_game(club, 3, 4, 3.0);
        let sooner = open_game(club, 1, 4, 5.5);
        let elsewhere = open_game(Uuid::new_v4(), 2, 4, 3.0);
        for b in [&later, &sooner, &elsewhere] {
            registry.index(b);
            store.insert(b.clone());
        }

        let filter = OpenGameFilter {
            club_id: Some(club),
            ..Default::default()
        };
        let ids: Vec<_> = registry.list(&store, &filter, 1.5).map(|b| b.id).collect();
        assert_eq!(ids, vec![sooner.id, later.id]);

        let filter = OpenGameFilter {
            club_id: Some(club),
            skill_level: Some(3.5),
            ..Default::default()
        };
        let ids: Vec<_> = registry.list(&store, &filter, 1.5).map(|b| b.id).collect();
        assert_eq!(ids, vec![later.id]);

        let filter = OpenGameFilter {
            date: Some(elsewhere.range.date()),
            ..Default::default()
        };
        assert_eq!(registry.list(&store, &filter, 1.5).count(), 1);
    }

    #[test]
    fn test_listing_is_a_snapshot() {
        let store = BookingStore::new();
        let registry = OpenGameRegistry::new();
        let game = open_game(Uuid::new_v4(), 1, 2, 3.0);
        registry.index(&game);
        store.insert(game.clone());

        let mut listing = registry.list(&store, &OpenGameFilter::default(), 1.5);
        registry
            .join(&store, &game.id, player(Uuid::new_v4()), 1.5)
            .unwrap();

        let seen = listing.next().unwrap();
        assert_eq!(seen.participants.len(), 1);
        assert!(!registry.contains(&game.id));
        assert_eq!(registry.list(&store, &OpenGameFilter::default(), 1.5).count(), 0);
    }

    #[test]
    fn test_last_seat_race_has_one_winner() {
        let store = Arc::new(BookingStore::new());
        let registry = Arc::new(OpenGameRegistry::new());
        let game = open_game(Uuid::new_v4(), 1, 2, 3.0);
        registry.index(&game);
        store.insert(game.clone());

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let (store, registry) = (store.clone(), registry.clone());
                    s.spawn(move || registry.join(&store, &game.id, player(Uuid::new_v4()), 1.5))
                })
                .collect();
            handles.into_iter().filter_map(|h| h.join().ok()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, BookingError::Full)));
        assert_eq!(store.get(&game.id).unwrap().participants.len(), 2);
    }

    #[test]
    fn test_join_closed_game() {
        let store = BookingStore::new();
        let registry = OpenGameRegistry::new();

        let mut invite_only = open_game(Uuid::new_v4(), 1, 4, 3.0);
        invite_only.mode = BookingMode::InviteOnly;
        store.insert(invite_only.clone());
        let err = registry
            .join(&store, &invite_only.id, player(Uuid::new_v4()), 1.5)
            .unwrap_err();
        assert!(matches!(err, BookingError::ClosedOrAlreadyConfirmed));

        let mut confirmed = open_game(Uuid::new_v4(), 1, 4, 3.0);
        confirmed.status = BookingStatus::Confirmed;
        store.insert(confirmed.clone());
        let err = registry
            .join(&store, &confirmed.id, player(Uuid::new_v4()), 1.5)
            .unwrap_err();
        assert!(matches!(err, BookingError::ClosedOrAlreadyConfirmed));
    }
}
