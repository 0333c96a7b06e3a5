use chrono::{Datelike, NaiveTime, Weekday};
use courtside_core::{ClubId, Court, TimeRange};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hourly court price for one club, weekday and start-time window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub club_id: ClubId,
    /// e.g. "peak", "off-peak"
    pub label: String,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub price_per_hour_cents: i64,
}

impl PricingRule {
    fn matches(&self, club_id: ClubId, weekday: Weekday, at: NaiveTime) -> bool {
        self.club_id == club_id
            && self.weekday == weekday
            && self.start_time <= at
            && at < self.end_time
    }

    fn collides_with(&self, other: &PricingRule) -> bool {
        self.club_id == other.club_id
            && self.weekday == other.weekday
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Slots starting at or after this time pay the court's lighting surcharge.
    pub lighting_from: NaiveTime,

    /// Prorated prices are rounded to a multiple of this (in cents).
    pub min_adjustment_cents: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            lighting_from: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or(NaiveTime::MIN),
            min_adjustment_cents: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceQuote {
    pub rule_label: String,
    pub base_cents: i64,
    pub lighting_surcharge_cents: i64,
    pub total_cents: i64,
}

/// Court pricing: rule lookup by weekday and start time, off-peak fallback,
/// proration by duration and lighting surcharge.
pub struct PricingEngine {
    config: PricingConfig,
    rules: Vec<PricingRule>,
}

impl PricingEngine {
    /// Rejects rule sets with overlapping windows on the same club and weekday.
    pub fn new(config: PricingConfig, rules: Vec<PricingRule>) -> Result<Self, PricingError> {
        for (i, rule) in rules.iter().enumerate() {
            if rule.end_time <= rule.start_time {
                return Err(PricingError::InvalidRule(format!(
                    "{}: end {} is not after start {}",
                    rule.label, rule.end_time, rule.start_time
                )));
            }
            if let Some(other) = rules[i + 1..].iter().find(|o| rule.collides_with(o)) {
                return Err(PricingError::OverlappingRules {
                    first: rule.label.clone(),
                    second: other.label.clone(),
                });
            }
        }
        Ok(Self { config, rules })
    }

    pub fn rules(&self) -> &[PricingRule] {
        &self.rules
    }

    /// Price the court for the given range.
    pub fn quote(&self, court: &Court, range: &TimeRange) -> Result<PriceQuote, PricingError> {
        let start = range.start.naive_utc();
        let rule = self
            .rules
            .iter()
            .find(|r| r.matches(court.club_id, start.weekday(), start.time()))
            .or_else(|| self.off_peak_rule(court.club_id))
            .ok_or(PricingError::NoRule(court.club_id))?;

        let minutes = range.duration().num_minutes();
        let base_cents = self.round(rule.price_per_hour_cents * minutes, 60);

        let lighting_surcharge_cents = if court.has_lighting && start.time() >= self.config.lighting_from {
            court.lighting_surcharge_cents
        } else {
            0
        };

        Ok(PriceQuote {
            rule_label: rule.label.clone(),
            base_cents,
            lighting_surcharge_cents,
            total_cents: base_cents + lighting_surcharge_cents,
        })
    }

    /// Cheapest rule for the club, used when no window matches.
    fn off_peak_rule(&self, club_id: ClubId) -> Option<&PricingRule> {
        self.rules
            .iter()
            .filter(|r| r.club_id == club_id)
            .min_by_key(|r| r.price_per_hour_cents)
    }

    /// `numerator / denominator`, rounded half-up to `min_adjustment_cents`.
    fn round(&self, numerator: i64, denominator: i64) -> i64 {
        let step = self.config.min_adjustment_cents.max(1) * denominator;
        let steps = (numerator + step / 2) / step;
        steps * self.config.min_adjustment_cents.max(1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("No pricing rule configured for club {0}")]
    NoRule(ClubId),

    #[error("Invalid pricing rule: {0}")]
    InvalidRule(String),

    #[error("Pricing rules {first} and {second} overlap")]
    OverlappingRules {
        first: String,
        second: String,
    },
}
