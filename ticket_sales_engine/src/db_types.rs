use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;
use tse_common::{Money, DEFAULT_CURRENCY_CODE};

#[derive(Debug, Clone, Error)]
#[error("Invalid {0}: {1}")]
pub struct ConversionError(pub &'static str, pub String);

//--------------------------------------    OrderNumber      ---------------------------------------------------------
/// The human-readable order identifier, e.g. `ORD-202407-0001`. The numeric sequence restarts every calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderNumber(pub String);

impl OrderNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `YYYYMM` month prefix the sequence is scoped to.
    pub fn month_prefix(timestamp: DateTime<Utc>) -> String {
        format!("ORD-{}-", timestamp.format("%Y%m"))
    }

    pub fn from_sequence(timestamp: DateTime<Utc>, sequence: u32) -> Self {
        Self(format!("{}{sequence:04}", Self::month_prefix(timestamp)))
    }

    /// Extracts the numeric sequence from an order number. Returns `None` for malformed input.
    pub fn sequence(&self) -> Option<u32> {
        self.0.rsplit('-').next().and_then(|s| s.parse().ok())
    }
}

impl Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

//--------------------------------------    OrderStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatus {
    /// The order has been created and no (or not enough) completed payments have been received.
    Pending,
    /// Cumulative completed payments have reached the order total.
    Paid,
    /// The order was cancelled while still pending. Terminal.
    Cancelled,
    /// Cumulative completed refunds have reached the cumulative completed payments. Terminal.
    Refunded,
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "Pending"),
            OrderStatus::Paid => write!(f, "Paid"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
            OrderStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Paid" => Ok(Self::Paid),
            "Cancelled" => Ok(Self::Cancelled),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError("order status", s.to_string())),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order status: {value}. But this conversion cannot fail. Defaulting to Pending");
            OrderStatus::Pending
        })
    }
}

//------------------------------------   SettlementStatus    ---------------------------------------------------------
/// Lifecycle status shared by payments and refunds. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum SettlementStatus {
    Pending,
    Completed,
    Failed,
}

impl Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementStatus::Pending => write!(f, "Pending"),
            SettlementStatus::Completed => write!(f, "Completed"),
            SettlementStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for SettlementStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            s => Err(ConversionError("settlement status", s.to_string())),
        }
    }
}

//--------------------------------------   PaymentMethod     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PaymentMethod {
    CreditCard,
    PayPal,
    BankTransfer,
    Crypto,
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentMethod::CreditCard => write!(f, "CreditCard"),
            PaymentMethod::PayPal => write!(f, "PayPal"),
            PaymentMethod::BankTransfer => write!(f, "BankTransfer"),
            PaymentMethod::Crypto => write!(f, "Crypto"),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CreditCard" => Ok(Self::CreditCard),
            "PayPal" => Ok(Self::PayPal),
            "BankTransfer" => Ok(Self::BankTransfer),
            "Crypto" => Ok(Self::Crypto),
            s => Err(ConversionError("payment method", s.to_string())),
        }
    }
}

//--------------------------------------   RefundReason      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum RefundReason {
    Cancellation,
    CustomerRequest,
    EventCancelled,
}

impl Display for RefundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefundReason::Cancellation => write!(f, "Cancellation"),
            RefundReason::CustomerRequest => write!(f, "CustomerRequest"),
            RefundReason::EventCancelled => write!(f, "EventCancelled"),
        }
    }
}

impl FromStr for RefundReason {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Cancellation" => Ok(Self::Cancellation),
            "CustomerRequest" => Ok(Self::CustomerRequest),
            "EventCancelled" => Ok(Self::EventCancelled),
            s => Err(ConversionError("refund reason", s.to_string())),
        }
    }
}

//--------------------------------------    UserAccount      ---------------------------------------------------------
/// A slim view of the user-profile store. Soft-deleted accounts keep their row but have `is_active` cleared.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    TicketType       ---------------------------------------------------------
/// Catalog view of a sellable ticket type. The `remaining_quantity` counter is the only state the sales flows mutate
/// outside an order's own subtree.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TicketType {
    pub id: i64,
    pub name: String,
    pub price: Money,
    pub currency: String,
    pub is_active: bool,
    pub remaining_quantity: i64,
}

//--------------------------------------       Order         ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: OrderNumber,
    pub user_id: i64,
    pub subtotal: Money,
    pub taxes: Money,
    pub total: Money,
    pub currency: String,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    /// The buyer placing the order. Must resolve to an existing, active account.
    pub user_id: i64,
    pub items: Vec<NewOrderItem>,
    pub notes: Option<String>,
}

impl NewOrder {
    pub fn new(user_id: i64, items: Vec<NewOrderItem>) -> Self {
        Self { user_id, items, notes: None }
    }

    pub fn with_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// The distinct ticket-type ids referenced by the cart lines.
    pub fn ticket_type_ids(&self) -> Vec<i64> {
        let mut ids = self.items.iter().map(|i| i.ticket_type_id).collect::<Vec<i64>>();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

//--------------------------------------     OrderItem       ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub ticket_type_id: i64,
    pub quantity: i64,
    /// Snapshot of the unit price at purchase time; later catalog price changes do not affect the order.
    pub unit_price: Money,
    pub total_price: Money,
    pub ticket_details: Option<Json<TicketDetails>>,
}

/// A cart line in an order request. The unit price is never caller-supplied; it is snapshotted from the catalog
/// when the order is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub ticket_type_id: i64,
    pub quantity: i64,
    pub ticket_details: Option<TicketDetails>,
}

impl NewOrderItem {
    pub fn new(ticket_type_id: i64, quantity: i64) -> Self {
        Self { ticket_type_id, quantity, ticket_details: None }
    }

    pub fn with_details(mut self, details: TicketDetails) -> Self {
        self.ticket_details = Some(details);
        self
    }
}

/// Optional seat/date detail blob attached to an order line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime<Utc>>,
}

//--------------------------------------      Payment        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    /// Unique gateway transaction identifier. Caller-supplied or generated as `TXN-{millis}-{rand}`.
    pub transaction_id: String,
    pub order_id: i64,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: SettlementStatus,
    pub metadata: Option<Json<PaymentMetadata>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn metadata(&self) -> PaymentMetadata {
        self.metadata.as_ref().map(|m| m.0.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: i64,
    pub amount: Money,
    pub method: PaymentMethod,
    /// If `None`, a transaction id is generated on insert.
    pub transaction_id: Option<String>,
    pub metadata: Option<PaymentMetadata>,
}

impl NewPayment {
    pub fn new(order_id: i64, amount: Money, method: PaymentMethod) -> Self {
        Self { order_id, amount, method, transaction_id: None, metadata: None }
    }

    pub fn with_transaction_id<S: Into<String>>(mut self, txid: S) -> Self {
        self.transaction_id = Some(txid.into());
        self
    }

    pub fn with_metadata(mut self, metadata: PaymentMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

//--------------------------------------  PaymentMetadata    ---------------------------------------------------------
/// Free-form gateway metadata stored against a payment as a JSON column.
///
/// The `refunds` receipt list is a denormalised summary written in the same transaction that completes a refund.
/// The `refunds` table is the authoritative ledger; nothing validates against these receipts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_last4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_fee: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refunds: Vec<RefundReceipt>,
}

impl PaymentMetadata {
    /// Total of the partial-refund receipts recorded against the payment.
    pub fn refunded_total(&self) -> Money {
        self.refunds.iter().map(|r| r.amount).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub amount: Money,
    pub processed_at: DateTime<Utc>,
    pub gateway_refund_id: String,
}

//--------------------------------------       Refund        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub order_id: i64,
    /// The originating payment being (partially) reversed.
    pub payment_id: i64,
    pub amount: Money,
    pub reason: RefundReason,
    pub status: SettlementStatus,
    pub notes: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub order_id: i64,
    pub payment_id: i64,
    pub amount: Money,
    pub reason: RefundReason,
    pub notes: Option<String>,
}

impl NewRefund {
    pub fn new(order_id: i64, payment_id: i64, amount: Money, reason: RefundReason) -> Self {
        Self { order_id, payment_id, amount, reason, notes: None }
    }

    pub fn with_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

//--------------------------------------     Constants       ---------------------------------------------------------
/// Sales tax applied to every order, in basis points.
pub const TAX_RATE_BPS: i64 = 1200;
/// Estimated gateway processing fee for completed payments, in basis points.
pub const PROCESSING_FEE_BPS: i64 = 290;

pub fn default_currency() -> String {
    DEFAULT_CURRENCY_CODE.to_string()
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn order_number_format() {
        let ts = Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        let num = OrderNumber::from_sequence(ts, 1);
        assert_eq!(num.as_str(), "ORD-202407-0001");
        assert_eq!(num.sequence(), Some(1));
        let num = OrderNumber::from_sequence(ts, 12_345);
        assert_eq!(num.as_str(), "ORD-202407-12345");
    }

    #[test]
    fn status_round_trips() {
        for s in ["Pending", "Paid", "Cancelled", "Refunded"] {
            assert_eq!(s.parse::<OrderStatus>().unwrap().to_string(), s);
        }
        for s in ["Pending", "Completed", "Failed"] {
            assert_eq!(s.parse::<SettlementStatus>().unwrap().to_string(), s);
        }
        assert!("Shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn distinct_ticket_type_ids() {
        let order = NewOrder::new(
            1,
            vec![NewOrderItem::new(7, 2), NewOrderItem::new(3, 1), NewOrderItem::new(7, 1)],
        );
        assert_eq!(order.ticket_type_ids(), vec![3, 7]);
    }

    #[test]
    fn metadata_json_shape() {
        // Absent fields must not appear in the stored JSON, and unknown input must not round-trip receipts in.
        let meta = PaymentMetadata { gateway_code: Some("00".to_string()), ..Default::default() };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({ "gateway_code": "00" }));
        let meta: PaymentMetadata =
            serde_json::from_str(r#"{"gateway_response":"SUCCESS","refunds":[]}"#).unwrap();
        assert_eq!(meta.gateway_response.as_deref(), Some("SUCCESS"));
        assert!(meta.refunds.is_empty());
    }

    #[test]
    fn metadata_refund_total() {
        let mut meta = PaymentMetadata::default();
        assert!(meta.refunded_total().is_zero());
        meta.refunds.push(RefundReceipt {
            amount: Money::from_whole(10),
            processed_at: Utc::now(),
            gateway_refund_id: "REF-1".to_string(),
        });
        meta.refunds.push(RefundReceipt {
            amount: Money::from_cents(550),
            processed_at: Utc::now(),
            gateway_refund_id: "REF-2".to_string(),
        });
        assert_eq!(meta.refunded_total(), Money::from_cents(1_550));
    }
}
