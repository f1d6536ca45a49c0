//! # Settlement gateway abstraction.
//!
//! Payments and refunds resolve to `Completed` or `Failed` through a settlement step against an external payment
//! gateway. That step is behind the [`SettlementGateway`] trait so that production can use the simulated
//! [`RandomGateway`] while tests inject deterministic outcomes.
//!
//! A settlement attempt must always resolve. Gateway errors are not propagated to callers as hard failures: the
//! flow layer converts them into a declined [`SettlementOutcome`] with the error captured, and the record is
//! written as `Failed`.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tse_common::Money;

/// Default approval rate for simulated payment settlements.
pub const PAYMENT_SUCCESS_RATE: f64 = 0.95;
/// Default approval rate for simulated refund settlements.
pub const REFUND_SUCCESS_RATE: f64 = 0.98;

pub const GATEWAY_CODE_APPROVED: &str = "00";
pub const GATEWAY_CODE_DECLINED: &str = "05";
pub const GATEWAY_CODE_ERROR: &str = "99";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementKind {
    Payment,
    Refund,
}

/// The request handed to the gateway for a single settlement attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub kind: SettlementKind,
    /// The transaction id (payments) or refund reference being settled.
    pub reference: String,
    pub amount: Money,
}

impl SettlementRequest {
    pub fn payment(reference: String, amount: Money) -> Self {
        Self { kind: SettlementKind::Payment, reference, amount }
    }

    pub fn refund(reference: String, amount: Money) -> Self {
        Self { kind: SettlementKind::Refund, reference, amount }
    }
}

/// The terminal result of a settlement attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub approved: bool,
    pub gateway_response: String,
    pub gateway_code: String,
    /// Populated when the settlement step itself raised an error rather than returning a decline.
    pub error: Option<String>,
}

impl SettlementOutcome {
    pub fn approved() -> Self {
        Self {
            approved: true,
            gateway_response: "SUCCESS".to_string(),
            gateway_code: GATEWAY_CODE_APPROVED.to_string(),
            error: None,
        }
    }

    pub fn declined() -> Self {
        Self {
            approved: false,
            gateway_response: "DECLINED".to_string(),
            gateway_code: GATEWAY_CODE_DECLINED.to_string(),
            error: None,
        }
    }

    pub fn errored<S: Into<String>>(error: S) -> Self {
        Self {
            approved: false,
            gateway_response: "ERROR".to_string(),
            gateway_code: GATEWAY_CODE_ERROR.to_string(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The settlement gateway is unavailable: {0}")]
    Unavailable(String),
    #[error("The settlement gateway rejected the request: {0}")]
    Rejected(String),
}

#[allow(async_fn_in_trait)]
pub trait SettlementGateway {
    /// Performs one settlement attempt. Implementations should return `Ok` with a declined outcome for ordinary
    /// gateway declines and reserve `Err` for the gateway itself misbehaving.
    async fn settle(&self, request: SettlementRequest) -> Result<SettlementOutcome, GatewayError>;
}

/// Simulated gateway with a random approve/decline outcome. Payments approve at 95% and refunds at 98% by default.
#[derive(Debug, Clone)]
pub struct RandomGateway {
    payment_success_rate: f64,
    refund_success_rate: f64,
}

impl Default for RandomGateway {
    fn default() -> Self {
        Self { payment_success_rate: PAYMENT_SUCCESS_RATE, refund_success_rate: REFUND_SUCCESS_RATE }
    }
}

impl RandomGateway {
    pub fn new(payment_success_rate: f64, refund_success_rate: f64) -> Self {
        Self { payment_success_rate, refund_success_rate }
    }
}

impl SettlementGateway for RandomGateway {
    async fn settle(&self, request: SettlementRequest) -> Result<SettlementOutcome, GatewayError> {
        let rate = match request.kind {
            SettlementKind::Payment => self.payment_success_rate,
            SettlementKind::Refund => self.refund_success_rate,
        };
        let outcome = if rand::random::<f64>() < rate {
            SettlementOutcome::approved()
        } else {
            SettlementOutcome::declined()
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn random_gateway_extremes_are_deterministic() {
        let always = RandomGateway::new(1.0, 1.0);
        let never = RandomGateway::new(0.0, 0.0);
        let req = SettlementRequest::payment("TXN-1".to_string(), Money::from_whole(10));
        assert!(always.settle(req.clone()).await.unwrap().approved);
        assert!(!never.settle(req).await.unwrap().approved);
    }

    #[test]
    fn outcome_constructors() {
        assert_eq!(SettlementOutcome::approved().gateway_code, GATEWAY_CODE_APPROVED);
        assert_eq!(SettlementOutcome::declined().gateway_response, "DECLINED");
        let err = SettlementOutcome::errored("boom");
        assert!(!err.approved);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }
}
