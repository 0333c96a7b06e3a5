use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use courtside_catalog::PricingEngine;
use courtside_core::{Court, TimeRange};
use serde::Serialize;

use crate::ledger::SlotLedger;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlotAvailability {
    pub range: TimeRange,
    pub available: bool,
    /// Absent when the club has no pricing rule at all.
    pub price_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourtAvailability {
    pub court: Court,
    pub slots: Vec<SlotAvailability>,
}

/// Read-only projection of the ledger onto a day's slot grid for a set of
/// courts. Computed on demand; nothing here is stored.
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityGrid {
    pub date: NaiveDate,
    pub courts: Vec<CourtAvailability>,
}

impl AvailabilityGrid {
    pub fn build(
        courts: Vec<Court>,
        date: NaiveDate,
        slot_length: Duration,
        ledger: &SlotLedger,
        pricing: &PricingEngine,
        now: DateTime<Utc>,
    ) -> Self {
        let courts = courts
            .into_iter()
            .map(|court| {
                let slots = day_slots(&court, date, slot_length)
                    .into_iter()
                    .map(|range| SlotAvailability {
                        range,
                        available: range.start >= now
                            && court.blackout_during(&range).is_none()
                            && ledger.is_available(court.id, &range),
                        price_cents: pricing.quote(&court, &range).ok().map(|q| q.total_cents),
                    })
                    .collect();
                CourtAvailability { court, slots }
            })
            .collect();

        Self { date, courts }
    }
}

/// Consecutive slots of `slot_length` from opening time, keeping only those
/// that end by closing time.
fn day_slots(court: &Court, date: NaiveDate, slot_length: Duration) -> Vec<TimeRange> {
    let Some((open, close)) = court.operating_hours.window_for(date.weekday()) else {
        return Vec::new();
    };
    if slot_length <= Duration::zero() {
        return Vec::new();
    }

    let opens_at = date.and_time(open).and_utc();
    let closes_at = if close == NaiveTime::MIN {
        match date.succ_opt() {
            Some(next) => next.and_time(close).and_utc(),
            None => return Vec::new(),
        }
    } else {
        date.and_time(close).and_utc()
    };

    let mut slots = Vec::new();
    let mut start = opens_at;
    while start + slot_length <= closes_at {
        if let Ok(range) = TimeRange::starting_at(start, slot_length) {
            slots.push(range);
        }
        start += slot_length;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};
    use courtside_catalog::{PricingConfig, PricingRule};
    use courtside_core::{CourtBlackout, ManualClock, OperatingHours, SurfaceType};
    use std::sync::Arc;
    use uuid::Uuid;

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn court(open: u32, close: u32) -> Court {
        Court {
            id: Uuid::new_v4(),
            club_id: Uuid::new_v4(),
            name: "Court 1".to_string(),
            surface_type: SurfaceType::Crystal,
            has_lighting: false,
            lighting_surcharge_cents: 0,
            is_active: true,
            operating_hours: OperatingHours::daily(t(open), t(close)),
            blackouts: Vec::new(),
        }
    }

    #[test]
    fn test_grid_marks_claimed_and_past_slots() {
        // 2025-06-02 is a Monday
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let ledger = SlotLedger::new(clock);
        let c = court(8, 14);
        let pricing = PricingEngine::new(
            PricingConfig::default(),
            vec![PricingRule {
                id: Uuid::new_v4(),
                club_id: c.club_id,
                label: "day".to_string(),
                weekday: Weekday::Mon,
                start_time: t(7),
                end_time: t(23),
                price_per_hour_cents: 2000,
            }],
        )
        .unwrap();

        let noon = TimeRange::starting_at(Utc.with_ymd_and_hms(2025, 6, 2, 12, 30, 0).unwrap(), Duration::minutes(30))
            .unwrap();
        ledger
            .try_hold(Uuid::new_v4(), c.id, noon, Duration::minutes(15))
            .unwrap();

        let grid = AvailabilityGrid::build(vec![c], date, Duration::minutes(90), &ledger, &pricing, now);
        let slots = &grid.courts[0].slots;
        // 08:00, 09:30, 11:00, 12:30
        assert_eq!(slots.len(), 4);
        assert!(!slots[0].available);
        assert!(slots[2].available);
        assert!(!slots[3].available);
        assert_eq!(slots[2].price_cents, Some(3000));
    }

    #[test]
    fn test_blackout_slots_are_unavailable() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let ledger = SlotLedger::new(Arc::new(ManualClock::new(now)));
        let pricing = PricingEngine::new(PricingConfig::default(), Vec::new()).unwrap();
        let mut c = court(8, 14);
        c.blackouts.push(CourtBlackout {
            range: TimeRange::new(
                Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
            )
            .unwrap(),
            reason: None,
        });

        let grid = AvailabilityGrid::build(vec![c], date, Duration::minutes(90), &ledger, &pricing, now);
        let available: Vec<bool> = grid.courts[0].slots.iter().map(|s| s.available).collect();
        // 08:00 and 09:30 touch the blackout
        assert_eq!(available, vec![false, false, true, true]);
    }

    #[test]
    fn test_closed_day_has_no_slots() {
        let mut c = court(8, 22);
        c.operating_hours.days.retain(|d| d.weekday != Weekday::Sun);
        // 2025-06-01 is a Sunday
        let slots = day_slots(&c, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), Duration::minutes(60));
        assert!(slots.is_empty());
    }

    #[test]
    fn test_midnight_close_includes_last_slot() {
        let c = court(22, 0);
        let slots = day_slots(&c, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(), Duration::minutes(60));
        assert_eq!(slots.len(), 2);
    }
}
