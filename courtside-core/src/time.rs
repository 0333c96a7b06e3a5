use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult, CourtId};

/// Half-open interval `[start, end)` on the UTC timeline.
///
/// Deserializing goes through [`TimeRange::new`], so an empty or inverted
/// range never makes it in from the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = CoreError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if end <= start {
            return Err(CoreError::ValidationError(format!(
                "time range end {} must be after start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Start strictly before end.
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> CoreResult<Self> {
        Self::new(start, start + duration)
    }

    /// Touching ranges (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// A court plus a contiguous time range. Slot state is never stored; it is
/// derived from the claims recorded against the court.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub court_id: CourtId,
    pub range: TimeRange,
}

impl SlotKey {
    pub fn new(court_id: CourtId, range: TimeRange) -> Self {
        Self { court_id, range }
    }

    pub fn overlaps(&self, other: &SlotKey) -> bool {
        self.court_id == other.court_id && self.range.overlaps(&other.range)
    }
}
