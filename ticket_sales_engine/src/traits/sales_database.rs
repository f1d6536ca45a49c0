use thiserror::Error;

use crate::{
    db_types::{NewOrder, NewPayment, NewRefund, Order, OrderItem, OrderNumber, Payment, Refund},
    gateway::SettlementOutcome,
    order_objects::{OrderQueryFilter, OrderStatistics, OrderUpdate},
    payment_objects::{PaymentStatistics, PaymentTrendPoint, PaymentUpdate, RefundStatistics, RefundUpdate},
    traits::{CatalogApiError, CatalogManagement},
};

/// This trait defines the core behaviour for backends supporting the ticket sales engine: building orders,
/// enforcing the order state machine, and bookkeeping payments and refunds through their settlement lifecycle.
///
/// Every multi-step mutation (order + items + inventory, settlement + reconciliation, cancellation + stock
/// restoration) must be applied atomically: a failure partway leaves no partial state visible.
#[allow(async_fn_in_trait)]
pub trait SalesDatabase: Clone + CatalogManagement {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Validates the cart and, in a single atomic transaction:
    /// * verifies the buyer exists and is active,
    /// * resolves every ticket type and checks it is active with enough availability,
    /// * computes line totals, subtotal, taxes and total,
    /// * allocates the next order number for the current month,
    /// * inserts the order and its items, and decrements each ticket type's availability.
    ///
    /// On any failure the transaction rolls back: neither the order nor any partial decrement is visible.
    async fn create_order(&self, order: NewOrder) -> Result<Order, SalesApiError>;

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, SalesApiError>;

    async fn fetch_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, SalesApiError>;

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, SalesApiError>;

    /// Applies a status and/or notes patch to an order.
    ///
    /// The only status change a caller may request directly is `Pending` → `Cancelled` (which restores stock,
    /// exactly as [`Self::cancel_order`]). `Paid` and `Refunded` are reached through reconciliation only. Orders in a
    /// terminal state (`Cancelled`, `Refunded`) reject every modification.
    async fn update_order(&self, order_id: i64, update: OrderUpdate) -> Result<Order, SalesApiError>;

    /// Cancels a pending order, restoring every item's quantity to its ticket type in the same transaction.
    /// Fails with [`SalesApiError::InvalidTransition`] for any non-pending order.
    async fn cancel_order(&self, order_id: i64) -> Result<Order, SalesApiError>;

    /// Hard-deletes an order. Only pending orders may be deleted; stock is restored first, then the items are
    /// removed, then the order itself, all in one transaction.
    async fn delete_order(&self, order_id: i64) -> Result<(), SalesApiError>;

    /// Validates a payment request against the order and persists the payment in `Pending` status.
    ///
    /// * the order must exist and be `Pending`,
    /// * the amount must be positive and must not exceed `total − Σ completed payments`,
    /// * the transaction id (generated when absent) must be unique.
    ///
    /// The settlement step is driven separately; see [`Self::record_settlement`].
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, SalesApiError>;

    /// Writes the outcome of a settlement attempt against a pending payment: terminal status, gateway metadata and
    /// the processed timestamp. On an approved outcome the estimated processing fee is stamped into the metadata
    /// and the order is reconciled (promoted to `Paid` once cumulative completed payments reach the total) within
    /// the same transaction.
    async fn record_settlement(&self, payment_id: i64, outcome: SettlementOutcome) -> Result<Payment, SalesApiError>;

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<Payment>, SalesApiError>;

    async fn fetch_payment_by_transaction_id(&self, txid: &str) -> Result<Option<Payment>, SalesApiError>;

    async fn fetch_payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, SalesApiError>;

    /// Applies a status and/or metadata patch to a payment. A `Completed` payment is frozen and a `Failed` payment
    /// can never be completed. A manual transition to `Completed` stamps the processed timestamp and reconciles the
    /// order, exactly as a gateway-approved settlement would.
    async fn update_payment(&self, payment_id: i64, update: PaymentUpdate) -> Result<Payment, SalesApiError>;

    /// Removes a payment record. Completed payments cannot be deleted.
    async fn delete_payment(&self, payment_id: i64) -> Result<(), SalesApiError>;

    /// Validates a refund request and persists the refund in `Pending` status.
    ///
    /// * order and originating payment must exist, and the payment must belong to the order,
    /// * the originating payment must be `Completed`,
    /// * the amount must be positive and must not exceed
    ///   `Σ completed payments on the order − Σ completed refunds on the order`.
    async fn insert_refund(&self, refund: NewRefund) -> Result<Refund, SalesApiError>;

    /// Writes the outcome of a refund settlement attempt. On an approved outcome, within one transaction:
    /// a refund receipt is appended to the originating payment's metadata, and the order is reconciled (promoted to
    /// `Refunded` once cumulative completed refunds reach cumulative completed payments).
    async fn record_refund_settlement(
        &self,
        refund_id: i64,
        outcome: SettlementOutcome,
    ) -> Result<Refund, SalesApiError>;

    async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, SalesApiError>;

    async fn fetch_refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>, SalesApiError>;

    /// Applies a status and/or notes patch to a refund. Only non-completed refunds may change. A manual transition
    /// to `Completed` runs the same bookkeeping as an approved settlement.
    async fn update_refund(&self, refund_id: i64, update: RefundUpdate) -> Result<Refund, SalesApiError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), SalesApiError> {
        Ok(())
    }
}

/// Query and statistics surface over the sales records.
#[allow(async_fn_in_trait)]
pub trait SalesReporting {
    /// Fetches orders according to criteria specified in the `OrderQueryFilter`.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, SalesApiError>;

    async fn order_statistics(&self) -> Result<OrderStatistics, SalesApiError>;

    async fn fetch_payments_by_method(
        &self,
        method: crate::db_types::PaymentMethod,
    ) -> Result<Vec<Payment>, SalesApiError>;

    async fn fetch_payments_by_status(
        &self,
        status: crate::db_types::SettlementStatus,
    ) -> Result<Vec<Payment>, SalesApiError>;

    async fn fetch_payments_for_user(&self, user_id: i64) -> Result<Vec<Payment>, SalesApiError>;

    /// Free-text search across transaction id, order number and buyer email.
    async fn search_payments(&self, term: &str) -> Result<Vec<Payment>, SalesApiError>;

    async fn payment_statistics(&self) -> Result<PaymentStatistics, SalesApiError>;

    /// Completed-payment series bucketed by day for the trailing `days` window.
    async fn payment_trends(&self, days: i64) -> Result<Vec<PaymentTrendPoint>, SalesApiError>;

    async fn refund_statistics(&self) -> Result<RefundStatistics, SalesApiError>;
}

#[derive(Debug, Clone, Error)]
pub enum SalesApiError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("The requested user {0} does not exist")]
    UserNotFound(i64),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(i64),
    #[error("The requested payment {0} does not exist")]
    PaymentNotFound(i64),
    #[error("The requested refund {0} does not exist")]
    RefundNotFound(i64),
    #[error("The requested ticket type {0} does not exist")]
    TicketTypeNotFound(i64),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Illegal status transition: {0}")]
    InvalidTransition(String),
    #[error("A payment already exists with transaction id {0}")]
    DuplicateTransactionId(String),
}

impl SalesApiError {
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        SalesApiError::InvalidRequest(msg.into())
    }

    pub fn invalid_transition<S: Into<String>>(msg: S) -> Self {
        SalesApiError::InvalidTransition(msg.into())
    }
}

impl From<sqlx::Error> for SalesApiError {
    fn from(e: sqlx::Error) -> Self {
        SalesApiError::DatabaseError(e.to_string())
    }
}

impl From<CatalogApiError> for SalesApiError {
    fn from(e: CatalogApiError) -> Self {
        match e {
            CatalogApiError::DatabaseError(msg) => SalesApiError::DatabaseError(msg),
            CatalogApiError::TicketTypeNotFound(id) => SalesApiError::TicketTypeNotFound(id),
            CatalogApiError::InsufficientStock { ticket_type_id, requested } => SalesApiError::InvalidRequest(
                format!("Not enough tickets available for ticket type {ticket_type_id} (requested {requested})"),
            ),
            CatalogApiError::UserNotFound(id) => SalesApiError::UserNotFound(id),
        }
    }
}
