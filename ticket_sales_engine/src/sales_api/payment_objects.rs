use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tse_common::Money;

use crate::db_types::{PaymentMetadata, PaymentMethod, SettlementStatus};

//--------------------------------------   PaymentUpdate     ---------------------------------------------------------
/// Patch object for [`crate::traits::SalesDatabase::update_payment`]. Only status and metadata are caller-mutable.
#[derive(Debug, Clone, Default)]
pub struct PaymentUpdate {
    pub new_status: Option<SettlementStatus>,
    pub new_metadata: Option<PaymentMetadata>,
}

impl PaymentUpdate {
    pub fn with_new_status(mut self, status: SettlementStatus) -> Self {
        self.new_status = Some(status);
        self
    }

    pub fn with_new_metadata(mut self, metadata: PaymentMetadata) -> Self {
        self.new_metadata = Some(metadata);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.new_status.is_none() && self.new_metadata.is_none()
    }
}

//--------------------------------------    RefundUpdate     ---------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct RefundUpdate {
    pub new_status: Option<SettlementStatus>,
    pub new_notes: Option<String>,
}

impl RefundUpdate {
    pub fn with_new_status(mut self, status: SettlementStatus) -> Self {
        self.new_status = Some(status);
        self
    }

    pub fn with_new_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.new_notes = Some(notes.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.new_status.is_none() && self.new_notes.is_none()
    }
}

//------------------------------------- PaymentStatistics ------------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentStatistics {
    pub total: i64,
    pub completed: i64,
    pub pending: i64,
    pub failed: i64,
    /// Completed payments as a fraction of all payments, in `[0, 1]`.
    pub success_rate: f64,
    pub average_amount: Money,
    /// Sum of completed payment amounts.
    pub total_revenue: Money,
    /// Estimated gateway fees over the completed revenue.
    pub estimated_fees: Money,
    /// Revenue minus estimated fees.
    pub net_revenue: Money,
    pub by_method: Vec<MethodBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MethodBreakdown {
    pub method: PaymentMethod,
    pub count: i64,
    pub total: Money,
}

/// One day's worth of completed payments in a trend series.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentTrendPoint {
    pub date: NaiveDate,
    pub count: i64,
    pub amount: Money,
}

//-------------------------------------- RefundStatistics ------------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundStatistics {
    pub total: i64,
    pub completed: i64,
    pub pending: i64,
    pub failed: i64,
    /// Sum of completed refund amounts.
    pub total_amount: Money,
}

//--------------------------------------   GatewayStatus     ---------------------------------------------------------
/// Point-in-time gateway view of a payment, as returned by `verify_payment_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub transaction_id: String,
    pub status: SettlementStatus,
    pub amount: Money,
    pub method: PaymentMethod,
    pub gateway_response: String,
    pub last_checked: DateTime<Utc>,
}
