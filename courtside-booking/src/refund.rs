use chrono::Duration;
use courtside_core::PlayerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Refund earned by cancelling at least `min_notice_hours` before the start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundTier {
    pub min_notice_hours: i64,
    pub refund_percent: u8,
}

/// Club cancellation policy. Tiers are checked from the longest notice down;
/// cancelling later than every tier refunds nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundPolicy {
    pub tiers: Vec<RefundTier>,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![RefundTier {
                min_notice_hours: 48,
                refund_percent: 100,
            }],
        }
    }
}

impl RefundPolicy {
    pub fn refund_percent(&self, notice: Duration) -> u8 {
        let mut tiers: Vec<&RefundTier> = self.tiers.iter().collect();
        tiers.sort_by(|a, b| b.min_notice_hours.cmp(&a.min_notice_hours));
        tiers
            .into_iter()
            .find(|t| notice >= Duration::hours(t.min_notice_hours))
            .map(|t| t.refund_percent.min(100))
            .unwrap_or(0)
    }

    /// Split `percent` of the captured total across the payers, in proportion
    /// to what each paid. Rounding leftovers go to the initiator; no payer is
    /// ever refunded more than they were charged.
    pub fn distribute(
        captured: &BTreeMap<PlayerId, i64>,
        percent: u8,
        initiator: PlayerId,
    ) -> BTreeMap<PlayerId, i64> {
        let percent = i64::from(percent.min(100));
        let total: i64 = captured.values().sum();
        let target = total * percent / 100;

        let mut shares: BTreeMap<PlayerId, i64> = captured
            .iter()
            .map(|(player, amount)| (*player, amount * percent / 100))
            .collect();

        let mut remainder = target - shares.values().sum::<i64>();
        // Initiator first, then everyone else in id order.
        let order = std::iter::once(initiator).chain(captured.keys().copied().filter(|p| *p != initiator));
        for player in order {
            if remainder == 0 {
                break;
            }
            let Some(paid) = captured.get(&player) else {
                continue;
            };
            let share = shares.entry(player).or_insert(0);
            let room = paid - *share;
            let extra = room.min(remainder);
            *share += extra;
            remainder -= extra;
        }

        shares.retain(|_, amount| *amount > 0);
        shares
    }
}

/// What a cancellation paid back.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundOutcome {
    pub refund_percent: u8,
    pub refunded: BTreeMap<PlayerId, i64>,
    /// Payers whose refund the processor rejected; the booking is flagged for
    /// manual follow-up.
    pub failed: Vec<PlayerId>,
}

impl RefundOutcome {
    pub fn total_refunded_cents(&self) -> i64 {
        self.refunded.values().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
