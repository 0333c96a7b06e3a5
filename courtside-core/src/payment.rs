use async_trait::async_trait;
use courtside_shared::Masked;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethodKind {
    Card,
    Wallet,
}

/// A participant's chosen way to pay. The token is opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMethod {
    pub kind: PaymentMethodKind,
    pub token: Masked<String>,
}

impl PaymentMethod {
    pub fn card(token: &str) -> Self {
        Self {
            kind: PaymentMethodKind::Card,
            token: Masked::from(token),
        }
    }
}

/// Processor-side reference to one authorized charge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProcessorToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    #[error("Charge declined: {0}")]
    Declined(String),
    #[error("Payment processor unavailable: {0}")]
    Unavailable(String),
}

/// Abstract card-processing contract. Implementations must be safe to call
/// concurrently; the engine never holds a slot lock across these calls.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Reserve `amount_cents` on the method without moving money.
    async fn authorize(
        &self,
        amount_cents: i64,
        currency: &str,
        method: &PaymentMethod,
    ) -> Result<ProcessorToken, ProcessorError>;

    async fn capture(&self, token: &ProcessorToken) -> Result<(), ProcessorError>;

    /// Release an authorization that was never captured.
    async fn void(&self, token: &ProcessorToken) -> Result<(), ProcessorError>;

    /// Return captured funds, possibly partially.
    async fn refund(&self, token: &ProcessorToken, amount_cents: i64) -> Result<(), ProcessorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorCall {
    Authorize { token: ProcessorToken, amount_cents: i64 },
    Capture(ProcessorToken),
    Void(ProcessorToken),
    Refund { token: ProcessorToken, amount_cents: i64 },
}

/// In-process processor used for local runs and tests.
///
/// Behavior is steered by the method token prefix:
/// `tok_decline*` is declined, `tok_unavailable*` fails as a transport error,
/// `tok_capture_fail*` authorizes but cannot be captured, `tok_refund_fail*`
/// captures but cannot be refunded. Anything else succeeds.
#[derive(Default)]
pub struct MockPaymentProcessor {
    methods: Mutex<HashMap<ProcessorToken, String>>,
    calls: Mutex<Vec<ProcessorCall>>,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ProcessorCall> {
        self.calls.lock().clone()
    }

    pub fn voided(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ProcessorCall::Void(_)))
            .count()
    }

    pub fn refunded_cents(&self) -> i64 {
        self.calls
            .lock()
            .iter()
            .map(|c| match c {
                ProcessorCall::Refund { amount_cents, .. } => *amount_cents,
                _ => 0,
            })
            .sum()
    }

    fn method_for(&self, token: &ProcessorToken) -> Result<String, ProcessorError> {
        self.methods
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| ProcessorError::Declined(format!("unknown token {}", token.0)))
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn authorize(
        &self,
        amount_cents: i64,
        _currency: &str,
        method: &PaymentMethod,
    ) -> Result<ProcessorToken, ProcessorError> {
        let raw = method.token.expose();
        if raw.starts_with("tok_decline") {
            return Err(ProcessorError::Declined("insufficient funds".to_string()));
        }
        if raw.starts_with("tok_unavailable") {
            return Err(ProcessorError::Unavailable("simulated gateway outage".to_string()));
        }

        let token = ProcessorToken(format!("mock_auth_{}", Uuid::new_v4().simple()));
        self.methods.lock().insert(token.clone(), raw.clone());
        self.calls.lock().push(ProcessorCall::Authorize {
            token: token.clone(),
            amount_cents,
        });
        Ok(token)
    }

    async fn capture(&self, token: &ProcessorToken) -> Result<(), ProcessorError> {
        if self.method_for(token)?.starts_with("tok_capture_fail") {
            return Err(ProcessorError::Unavailable("capture rejected".to_string()));
        }
        self.calls.lock().push(ProcessorCall::Capture(token.clone()));
        Ok(())
    }

    async fn void(&self, token: &ProcessorToken) -> Result<(), ProcessorError> {
        self.method_for(token)?;
        self.calls.lock().push(ProcessorCall::Void(token.clone()));
        Ok(())
    }

    async fn refund(&self, token: &ProcessorToken, amount_cents: i64) -> Result<(), ProcessorError> {
        if self.method_for(token)?.starts_with("tok_refund_fail") {
            return Err(ProcessorError::Unavailable("refund rejected".to_string()));
        }
        self.calls.lock().push(ProcessorCall::Refund {
            token: token.clone(),
            amount_cents,
        });
        Ok(())
    }
}
