use chrono::Duration;
use serde::Deserialize;

use crate::refund::RefundPolicy;

/// Engine tunables. Every value has a serde default so a partial `[engine]`
/// section in the config file is enough.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Lifetime of a hold before payment must complete.
    #[serde(default = "default_hold_ttl")]
    pub hold_ttl_seconds: u64,
    /// How long an open game may wait for players before it goes to payment
    /// with whoever has joined.
    #[serde(default = "default_open_game_grace")]
    pub open_game_grace_seconds: u64,
    #[serde(default = "default_max_payment_attempts")]
    pub max_payment_attempts: u32,
    /// Skill spread above which joins carry a warning.
    #[serde(default = "default_skill_range")]
    pub skill_range_allowed: f32,
    #[serde(default = "default_min_notice")]
    pub min_booking_notice_minutes: i64,
    #[serde(default = "default_max_advance")]
    pub max_advance_days: i64,
    /// Granularity of the availability grid.
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: i64,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u8,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default)]
    pub refund_policy: RefundPolicy,
    /// Bookings one player may initiate per ISO week. Unlimited when unset.
    #[serde(default)]
    pub max_bookings_per_player_per_week: Option<u32>,
}

fn default_hold_ttl() -> u64 { 900 }
fn default_open_game_grace() -> u64 { 1800 }
fn default_max_payment_attempts() -> u32 { 3 }
fn default_skill_range() -> f32 { 1.5 }
fn default_min_notice() -> i64 { 120 }
fn default_max_advance() -> i64 { 14 }
fn default_slot_minutes() -> i64 { 90 }
fn default_max_capacity() -> u8 { 4 }
fn default_currency() -> String { "GBP".to_string() }
fn default_sweep_interval() -> u64 { 30 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: default_hold_ttl(),
            open_game_grace_seconds: default_open_game_grace(),
            max_payment_attempts: default_max_payment_attempts(),
            skill_range_allowed: default_skill_range(),
            min_booking_notice_minutes: default_min_notice(),
            max_advance_days: default_max_advance(),
            slot_minutes: default_slot_minutes(),
            max_capacity: default_max_capacity(),
            currency: default_currency(),
            sweep_interval_seconds: default_sweep_interval(),
            refund_policy: RefundPolicy::default(),
            max_bookings_per_player_per_week: None,
        }
    }
}

impl EngineConfig {
    pub fn hold_ttl(&self) -> Duration {
        Duration::seconds(self.hold_ttl_seconds as i64)
    }

    pub fn open_game_grace(&self) -> Duration {
        Duration::seconds(self.open_game_grace_seconds as i64)
    }

    pub fn min_notice(&self) -> Duration {
        Duration::minutes(self.min_booking_notice_minutes)
    }

    pub fn max_advance(&self) -> Duration {
        Duration::days(self.max_advance_days)
    }

    pub fn slot_length(&self) -> Duration {
        Duration::minutes(self.slot_minutes)
    }
}
