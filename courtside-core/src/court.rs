use chrono::{Datelike, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::{ClubId, CourtId, TimeRange};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceType {
    Indoor,
    Outdoor,
    Crystal,
    ArtificialGrass,
}

impl std::str::FromStr for SurfaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indoor" => Ok(SurfaceType::Indoor),
            "outdoor" => Ok(SurfaceType::Outdoor),
            "crystal" => Ok(SurfaceType::Crystal),
            "artificial_grass" => Ok(SurfaceType::ArtificialGrass),
            other => Err(format!("unknown surface type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayHours {
    pub weekday: Weekday,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

/// Weekly opening windows. A weekday without an entry is closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatingHours {
    pub days: Vec<DayHours>,
}

impl OperatingHours {
    /// Same window every day of the week.
    pub fn daily(open: NaiveTime, close: NaiveTime) -> Self {
        let days = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .map(|weekday| DayHours { weekday, open, close })
        .collect();
        Self { days }
    }

    pub fn window_for(&self, weekday: Weekday) -> Option<(NaiveTime, NaiveTime)> {
        self.days
            .iter()
            .find(|d| d.weekday == weekday)
            .map(|d| (d.open, d.close))
    }

    /// True when the whole range sits inside one day's opening window.
    pub fn admits(&self, range: &TimeRange) -> bool {
        let start = range.start.naive_utc();
        let end = range.end.naive_utc();
        let Some((open, close)) = self.window_for(start.weekday()) else {
            return false;
        };

        if end.date() != start.date() {
            // Only a range ending exactly at midnight may cross the date line.
            let midnight_close = close == NaiveTime::MIN
                && end.time() == NaiveTime::MIN
                && end.date() == start.date().succ_opt().unwrap_or(start.date());
            return midnight_close && start.time() >= open;
        }

        start.time() >= open && end.time() <= close
    }
}

/// A window when the court is closed to bookings, e.g. maintenance or a
/// tournament.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourtBlackout {
    pub range: TimeRange,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A bookable court. Owned by staff-side configuration; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Court {
    pub id: CourtId,
    pub club_id: ClubId,
    pub name: String,
    pub surface_type: SurfaceType,
    #[serde(default)]
    pub has_lighting: bool,
    #[serde(default)]
    pub lighting_surcharge_cents: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub operating_hours: OperatingHours,
    #[serde(default)]
    pub blackouts: Vec<CourtBlackout>,
}

impl Court {
    /// The first blackout overlapping `range`.
    pub fn blackout_during(&self, range: &TimeRange) -> Option<&CourtBlackout> {
        self.blackouts.iter().find(|b| b.range.overlaps(range))
    }
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn hours() -> OperatingHours {
        OperatingHours::daily(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_admits_range_inside_window() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 11, 30, 0).unwrap(),
        )
        .unwrap();
        assert!(hours().admits(&range));
    }

    #[test]
    fn test_rejects_range_past_closing() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 21, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 22, 30, 0).unwrap(),
        )
        .unwrap();
        assert!(!hours().admits(&range));
    }

    #[test]
    fn test_closed_day_admits_nothing() {
        let hours = OperatingHours {
            days: vec![DayHours {
                weekday: Weekday::Tue,
                open: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                close: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            }],
        };
        // 2025-06-02 is a Monday
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 11, 0, 0).unwrap(),
        )
        .unwrap();
        assert!(!hours.admits(&range));
    }

    #[test]
    fn test_blackout_blocks_overlapping_ranges_only() {
        let at = |h, m| Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap();
        let court = Court {
            id: uuid::Uuid::new_v4(),
            club_id: uuid::Uuid::new_v4(),
            name: "Court 1".to_string(),
            surface_type: SurfaceType::Indoor,
            has_lighting: false,
            lighting_surcharge_cents: 0,
            is_active: true,
            operating_hours: hours(),
            blackouts: vec![CourtBlackout {
                range: TimeRange::new(at(12, 0), at(14, 0)).unwrap(),
                reason: Some("resurfacing".to_string()),
            }],
        };

        let lunch = TimeRange::new(at(13, 0), at(14, 30)).unwrap();
        let blackout = court.blackout_during(&lunch).unwrap();
        assert_eq!(blackout.reason.as_deref(), Some("resurfacing"));

        let morning = TimeRange::new(at(10, 30), at(12, 0)).unwrap();
        assert!(court.blackout_during(&morning).is_none());
    }

    #[test]
    fn test_surface_type_parses_query_values() {
        assert_eq!("crystal".parse::<SurfaceType>(), Ok(SurfaceType::Crystal));
        assert!("clay".parse::<SurfaceType>().is_err());
    }
}
