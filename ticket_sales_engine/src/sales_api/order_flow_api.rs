use std::fmt::Debug;

use chrono::Utc;
use log::*;
use tse_common::Money;

use crate::{
    db_types::{NewOrder, NewPayment, NewRefund, Order, OrderItem, Payment, Refund, RefundReason, SettlementStatus},
    gateway::{SettlementGateway, SettlementOutcome, SettlementRequest},
    order_objects::OrderUpdate,
    payment_objects::{GatewayStatus, PaymentUpdate, RefundUpdate},
    traits::{SalesApiError, SalesDatabase},
};

/// `OrderFlowApi` is the primary API for the sales transaction lifecycle: building orders, taking payments through
/// their settlement step, and issuing partial or total refunds.
///
/// The settlement step is delegated to the injected [`SettlementGateway`]. A gateway failure never unwinds the
/// flow: the attempt is captured as a failed settlement and the payment or refund record ends up `Failed`.
pub struct OrderFlowApi<B, G> {
    db: B,
    gateway: G,
}

impl<B, G> Debug for OrderFlowApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B, G> OrderFlowApi<B, G> {
    pub fn new(db: B, gateway: G) -> Self {
        Self { db, gateway }
    }
}

impl<B, G> OrderFlowApi<B, G>
where
    B: SalesDatabase,
    G: SettlementGateway,
{
    /// Submit a new order.
    ///
    /// The cart is validated, totals are computed, an order number is allocated and availability is reserved, all
    /// in a single atomic transaction. On any failure nothing is persisted and no seats are held.
    pub async fn create_order(&self, order: NewOrder) -> Result<Order, SalesApiError> {
        let order = self.db.create_order(order).await?;
        debug!("🔄️📦️ Order [{}] processing complete", order.order_number);
        Ok(order)
    }

    pub async fn fetch_order(&self, order_id: i64) -> Result<Order, SalesApiError> {
        self.db.fetch_order(order_id).await?.ok_or(SalesApiError::OrderNotFound(order_id))
    }

    pub async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, SalesApiError> {
        self.db.fetch_order_items(order_id).await
    }

    /// Applies a status and/or notes patch to an order. The only status change callers may request is
    /// `Pending` → `Cancelled`; `Paid` and `Refunded` are reached through settlement reconciliation.
    pub async fn update_order(&self, order_id: i64, update: OrderUpdate) -> Result<Order, SalesApiError> {
        self.db.update_order(order_id, update).await
    }

    /// Cancels a pending order, returning its seats to inventory.
    pub async fn cancel_order(&self, order_id: i64) -> Result<Order, SalesApiError> {
        self.db.cancel_order(order_id).await
    }

    /// Hard-deletes a pending order after returning its seats to inventory.
    pub async fn delete_order(&self, order_id: i64) -> Result<(), SalesApiError> {
        self.db.delete_order(order_id).await
    }

    /// Submit a payment against a pending order and drive it through settlement.
    ///
    /// The payment is validated and persisted as `Pending`, handed to the gateway, and the verdict is written back
    /// (with order reconciliation on approval). A declined or errored settlement is a *successful* call returning a
    /// `Failed` payment; inspect [`Payment::status`] and the metadata for the gateway's reasons.
    pub async fn create_payment(&self, payment: NewPayment) -> Result<Payment, SalesApiError> {
        let payment = self.db.insert_payment(payment).await?;
        trace!("🔄️🪙️ Payment [{}] recorded. Requesting settlement", payment.transaction_id);
        let request = SettlementRequest::payment(payment.transaction_id.clone(), payment.amount);
        let outcome = match self.gateway.settle(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("🔄️🪙️ Gateway error while settling payment [{}]: {e}", payment.transaction_id);
                SettlementOutcome::errored(e.to_string())
            },
        };
        let payment = self.db.record_settlement(payment.id, outcome).await?;
        debug!("🔄️🪙️ Payment [{}] processing complete: {}", payment.transaction_id, payment.status);
        Ok(payment)
    }

    pub async fn fetch_payment(&self, payment_id: i64) -> Result<Payment, SalesApiError> {
        self.db.fetch_payment(payment_id).await?.ok_or(SalesApiError::PaymentNotFound(payment_id))
    }

    pub async fn fetch_payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, SalesApiError> {
        self.db.fetch_payments_for_order(order_id).await
    }

    pub async fn update_payment(&self, payment_id: i64, update: PaymentUpdate) -> Result<Payment, SalesApiError> {
        self.db.update_payment(payment_id, update).await
    }

    pub async fn delete_payment(&self, payment_id: i64) -> Result<(), SalesApiError> {
        self.db.delete_payment(payment_id).await
    }

    /// Re-checks a payment's status, as a client polling the gateway would.
    ///
    /// The simulated gateway has no out-of-band state, so the stored settlement verdict is authoritative and is
    /// simply reported with a fresh timestamp.
    pub async fn verify_payment_status(&self, transaction_id: &str) -> Result<GatewayStatus, SalesApiError> {
        let payment = self
            .db
            .fetch_payment_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| SalesApiError::invalid_request(format!("No payment with transaction id {transaction_id}")))?;
        let gateway_response = payment.metadata().gateway_response.unwrap_or_else(|| "PENDING".to_string());
        Ok(GatewayStatus {
            transaction_id: payment.transaction_id,
            status: payment.status,
            amount: payment.amount,
            method: payment.method,
            gateway_response,
            last_checked: Utc::now(),
        })
    }

    /// Refund a completed payment, partially or in full.
    ///
    /// When `amount` is `None` the remaining refundable balance of the payment is refunded. The amount may never
    /// exceed `payment amount − Σ completed refunds against the payment`; order-level caps are enforced by the
    /// refund builder it delegates to.
    pub async fn refund_payment(&self, payment_id: i64, amount: Option<Money>) -> Result<Refund, SalesApiError> {
        let payment = self.fetch_payment(payment_id).await?;
        if payment.status != SettlementStatus::Completed {
            return Err(SalesApiError::invalid_transition(format!(
                "Only completed payments can be refunded. Payment [{}] is {}",
                payment.transaction_id, payment.status
            )));
        }
        let already_refunded = payment.metadata().refunded_total();
        let refundable = payment.amount - already_refunded;
        let amount = amount.unwrap_or(refundable);
        if amount > refundable {
            return Err(SalesApiError::invalid_request(format!(
                "Refund of {amount} exceeds the refundable balance of {refundable} on payment [{}]",
                payment.transaction_id
            )));
        }
        let refund = NewRefund::new(payment.order_id, payment.id, amount, RefundReason::CustomerRequest);
        self.create_refund(refund).await
    }

    /// Submit a refund and drive it through settlement.
    ///
    /// The refund is validated and persisted as `Pending`, handed to the gateway, and the verdict is written back.
    /// On approval a receipt is appended to the originating payment's metadata and the order is reconciled, all in
    /// the same transaction.
    pub async fn create_refund(&self, refund: NewRefund) -> Result<Refund, SalesApiError> {
        let refund = self.db.insert_refund(refund).await?;
        trace!("🔄️↩️ Refund {} recorded. Requesting settlement", refund.id);
        let request = SettlementRequest::refund(format!("refund-{}", refund.id), refund.amount);
        let outcome = match self.gateway.settle(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("🔄️↩️ Gateway error while settling refund {}: {e}", refund.id);
                SettlementOutcome::errored(e.to_string())
            },
        };
        let refund = self.db.record_refund_settlement(refund.id, outcome).await?;
        debug!("🔄️↩️ Refund {} processing complete: {}", refund.id, refund.status);
        Ok(refund)
    }

    pub async fn fetch_refund(&self, refund_id: i64) -> Result<Refund, SalesApiError> {
        self.db.fetch_refund(refund_id).await?.ok_or(SalesApiError::RefundNotFound(refund_id))
    }

    pub async fn fetch_refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>, SalesApiError> {
        self.db.fetch_refunds_for_order(order_id).await
    }

    pub async fn update_refund(&self, refund_id: i64, update: RefundUpdate) -> Result<Refund, SalesApiError> {
        self.db.update_refund(refund_id, update).await
    }
}
