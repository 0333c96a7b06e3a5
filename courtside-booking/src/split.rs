use chrono::{DateTime, Utc};
use courtside_core::{BookingId, PaymentMethod, PaymentProcessor, PlayerId, ProcessorError, ProcessorToken};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{AuthorizationStatus, Booking, ChargeLine, PaymentAuthorization};
use crate::refund::{RefundOutcome, RefundPolicy};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("No payment method supplied for player {0}")]
    MissingMethod(PlayerId),

    #[error("Payment declined for player {player_id}: {reason}")]
    Declined { player_id: PlayerId, reason: String },

    #[error("Payment declined for player {player_id} after others authorized: {reason}")]
    PartialFailure {
        player_id: PlayerId,
        reason: String,
        voided: usize,
    },

    #[error("Capture failed for player {player_id}: {reason}")]
    CaptureFailed { player_id: PlayerId, reason: String },

    #[error("Payment processor error: {0}")]
    Processor(String),

    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("Split shares sum to {actual}, expected {expected}")]
    SplitMismatch { expected: i64, actual: i64 },
}

impl PaymentError {
    /// The processor was reached and turned the attempt down.
    pub fn is_processor_outcome(&self) -> bool {
        matches!(
            self,
            PaymentError::Declined { .. }
                | PaymentError::PartialFailure { .. }
                | PaymentError::CaptureFailed { .. }
                | PaymentError::Processor(_)
        )
    }
}

/// Divides a booking's total across its participants and collects it as one
/// all-or-nothing authorization: either every share is authorized or none is
/// left standing.
pub struct PaymentSplitCoordinator {
    processor: Arc<dyn PaymentProcessor>,
}

impl PaymentSplitCoordinator {
    pub fn new(processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { processor }
    }

    /// Per-player amounts owed. The court price is split evenly (or by the
    /// agreed custom split) with any rounding remainder on the initiator;
    /// equipment is owed by whoever rented it. Shares always sum to the total.
    pub fn compute_split(booking: &Booking) -> Result<BTreeMap<PlayerId, i64>, PaymentError> {
        if booking.participants.is_empty() {
            return Err(PaymentError::InvalidSplit("booking has no participants".to_string()));
        }

        let mut shares: BTreeMap<PlayerId, i64> = match &booking.custom_split {
            Some(custom) => {
                let covers_everyone = custom.len() == booking.participants.len()
                    && booking.participants.iter().all(|p| custom.contains_key(&p.player_id));
                if !covers_everyone {
                    return Err(PaymentError::InvalidSplit(
                        "custom split must name every participant exactly once".to_string(),
                    ));
                }
                if custom.values().any(|amount| *amount < 0) {
                    return Err(PaymentError::InvalidSplit("negative share".to_string()));
                }
                let sum: i64 = custom.values().sum();
                if sum != booking.court_price_cents {
                    return Err(PaymentError::SplitMismatch {
                        expected: booking.court_price_cents,
                        actual: sum,
                    });
                }
                custom.clone()
            }
            None => {
                let count = booking.participants.len() as i64;
                let base = booking.court_price_cents / count;
                let remainder = booking.court_price_cents % count;
                booking
                    .participants
                    .iter()
                    .map(|p| {
                        let extra = if p.player_id == booking.initiator { remainder } else { 0 };
                        (p.player_id, base + extra)
                    })
                    .collect()
            }
        };

        for line in &booking.equipment {
            let payer = if shares.contains_key(&line.renter) {
                line.renter
            } else {
                booking.initiator
            };
            *shares.entry(payer).or_insert(0) += line.charge_cents;
        }

        let actual: i64 = shares.values().sum();
        if actual != booking.total_price_cents {
            return Err(PaymentError::SplitMismatch {
                expected: booking.total_price_cents,
                actual,
            });
        }
        Ok(shares)
    }

    /// Every non-zero share needs a payment method.
    pub fn check_methods(
        shares: &BTreeMap<PlayerId, i64>,
        methods: &HashMap<PlayerId, PaymentMethod>,
    ) -> Result<(), PaymentError> {
        match shares
            .iter()
            .find(|(player, amount)| **amount > 0 && !methods.contains_key(*player))
        {
            Some((player, _)) => Err(PaymentError::MissingMethod(*player)),
            None => Ok(()),
        }
    }

    /// Authorize every share. A decline voids whatever was already authorized.
    pub async fn authorize(
        &self,
        booking_id: BookingId,
        shares: &BTreeMap<PlayerId, i64>,
        methods: &HashMap<PlayerId, PaymentMethod>,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentAuthorization, PaymentError> {
        Self::check_methods(shares, methods)?;

        let mut charges: Vec<ChargeLine> = Vec::with_capacity(shares.len());
        for (player_id, amount) in shares {
            let Some(method) = methods.get(player_id).filter(|_| *amount > 0) else {
                charges.push(ChargeLine {
                    player_id: *player_id,
                    amount_cents: *amount,
                    token: None,
                    captured: false,
                    refunded_cents: 0,
                });
                continue;
            };

            match self.processor.authorize(*amount, currency, method).await {
                Ok(token) => charges.push(ChargeLine {
                    player_id: *player_id,
                    amount_cents: *amount,
                    token: Some(token),
                    captured: false,
                    refunded_cents: 0,
                }),
                Err(err) => {
                    let tokens: Vec<ProcessorToken> = charges.iter().filter_map(|c| c.token.clone()).collect();
                    let voided = self.void_tokens(&tokens).await;
                    tracing::warn!(%booking_id, %player_id, error = %err, voided, "authorization failed");
                    return Err(match err {
                        ProcessorError::Declined(reason) if tokens.is_empty() => PaymentError::Declined {
                            player_id: *player_id,
                            reason,
                        },
                        ProcessorError::Declined(reason) => PaymentError::PartialFailure {
                            player_id: *player_id,
                            reason,
                            voided,
                        },
                        ProcessorError::Unavailable(reason) => PaymentError::Processor(reason),
                    });
                }
            }
        }

        Ok(PaymentAuthorization {
            id: Uuid::new_v4(),
            booking_id,
            total_cents: shares.values().sum(),
            currency: currency.to_string(),
            charges,
            status: AuthorizationStatus::Authorized,
            created_at: now,
        })
    }

    /// Capture every authorized share. If any capture fails, captured shares
    /// are refunded and the rest voided so no participant is left charged.
    pub async fn capture(&self, auth: &mut PaymentAuthorization) -> Result<(), PaymentError> {
        let mut failure = None;
        for charge in auth.charges.iter_mut() {
            let Some(token) = &charge.token else {
                continue;
            };
            match self.processor.capture(token).await {
                Ok(()) => charge.captured = true,
                Err(err) => {
                    failure = Some(PaymentError::CaptureFailed {
                        player_id: charge.player_id,
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        }

        let Some(failure) = failure else {
            auth.status = AuthorizationStatus::Captured;
            return Ok(());
        };

        tracing::error!(booking_id = %auth.booking_id, error = %failure, "capture failed, unwinding");
        for charge in auth.charges.iter_mut() {
            let Some(token) = &charge.token else {
                continue;
            };
            if charge.captured {
                match self.processor.refund(token, charge.amount_cents).await {
                    Ok(()) => charge.refunded_cents = charge.amount_cents,
                    Err(err) => tracing::error!(player_id = %charge.player_id, error = %err, "unwind refund failed"),
                }
            } else if let Err(err) = self.processor.void(token).await {
                tracing::warn!(player_id = %charge.player_id, error = %err, "unwind void failed");
            }
        }
        auth.status = AuthorizationStatus::Failed;
        Err(failure)
    }

    /// Release an authorization that was never captured.
    pub async fn void(&self, auth: &mut PaymentAuthorization) {
        if auth.status != AuthorizationStatus::Authorized {
            return;
        }
        let tokens: Vec<ProcessorToken> = auth.charges.iter().filter_map(|c| c.token.clone()).collect();
        self.void_tokens(&tokens).await;
        auth.status = AuthorizationStatus::Voided;
    }

    /// Refund `percent` of the captured amount, proportionally per payer.
    pub async fn refund(&self, auth: &mut PaymentAuthorization, percent: u8, initiator: PlayerId) -> RefundOutcome {
        let mut outcome = RefundOutcome {
            refund_percent: percent,
            ..Default::default()
        };
        if auth.status != AuthorizationStatus::Captured {
            return outcome;
        }

        let captured: BTreeMap<PlayerId, i64> = auth
            .charges
            .iter()
            .filter(|c| c.captured)
            .map(|c| (c.player_id, c.amount_cents - c.refunded_cents))
            .collect();
        let plan = RefundPolicy::distribute(&captured, percent, initiator);

        for charge in auth.charges.iter_mut() {
            let (Some(amount), Some(token)) = (plan.get(&charge.player_id), &charge.token) else {
                continue;
            };
            match self.processor.refund(token, *amount).await {
                Ok(()) => {
                    charge.refunded_cents += amount;
                    outcome.refunded.insert(charge.player_id, *amount);
                }
                Err(err) => {
                    tracing::error!(
                        booking_id = %auth.booking_id,
                        player_id = %charge.player_id,
                        amount_cents = amount,
                        error = %err,
                        "refund failed"
                    );
                    outcome.failed.push(charge.player_id);
                }
            }
        }
        outcome
    }

    async fn void_tokens(&self, tokens: &[ProcessorToken]) -> usize {
        let mut voided = 0;
        for token in tokens {
            match self.processor.void(token).await {
                Ok(()) => voided += 1,
                Err(err) => tracing::warn!(token = %token.0, error = %err, "void failed"),
            }
        }
        voided
    }
}
