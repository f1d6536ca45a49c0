//! `SqliteDatabase` is a concrete implementation of a ticket sales engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module. Every multi-step mutation runs inside a single `sqlx` transaction so that a failure partway through
//! leaves no partial state behind.
use std::{collections::HashMap, fmt::Debug};

use chrono::Utc;
use log::*;
use sqlx::{SqliteConnection, SqlitePool};
use tse_common::Money;

use super::db::{catalog, db_url, new_pool, orders, orders::OrderDraft, payments, refunds};
use crate::{
    db_types::{
        NewOrder,
        NewPayment,
        NewRefund,
        Order,
        OrderItem,
        OrderNumber,
        OrderStatus,
        Payment,
        PaymentMethod,
        Refund,
        RefundReceipt,
        SettlementStatus,
        TicketType,
        UserAccount,
        PROCESSING_FEE_BPS,
        TAX_RATE_BPS,
    },
    gateway::SettlementOutcome,
    helpers::new_gateway_refund_id,
    order_objects::{OrderQueryFilter, OrderStatistics, OrderUpdate},
    payment_objects::{PaymentStatistics, PaymentTrendPoint, PaymentUpdate, RefundStatistics, RefundUpdate},
    traits::{CatalogApiError, CatalogManagement, SalesApiError, SalesDatabase, SalesReporting},
};

/// Order-number allocation races with a concurrent order in the same month. The UNIQUE constraint catches the
/// loser, which simply re-allocates.
const MAX_ORDER_NUMBER_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn try_create_order(&self, order: &NewOrder) -> Result<Order, SalesApiError> {
        if order.items.is_empty() {
            return Err(SalesApiError::invalid_request("An order must contain at least one item"));
        }
        if let Some(item) = order.items.iter().find(|i| i.quantity < 1) {
            return Err(SalesApiError::invalid_request(format!(
                "Invalid quantity {} for ticket type {}",
                item.quantity, item.ticket_type_id
            )));
        }
        let mut tx = self.pool.begin().await?;
        let user = catalog::fetch_user(order.user_id, &mut tx).await?.ok_or(SalesApiError::UserNotFound(order.user_id))?;
        if !user.is_active {
            return Err(SalesApiError::UserNotFound(order.user_id));
        }
        let ids = order.ticket_type_ids();
        let types = catalog::fetch_ticket_types(&ids, &mut tx).await?;
        let types = types.into_iter().map(|t| (t.id, t)).collect::<HashMap<i64, TicketType>>();
        let mut currency: Option<String> = None;
        for id in &ids {
            let tt = types.get(id).ok_or(SalesApiError::TicketTypeNotFound(*id))?;
            if !tt.is_active {
                return Err(SalesApiError::invalid_request(format!("Ticket type {} ({}) is not on sale", tt.id, tt.name)));
            }
            match currency.as_deref() {
                None => currency = Some(tt.currency.clone()),
                Some(c) if c == tt.currency => {},
                Some(c) => {
                    return Err(SalesApiError::invalid_request(format!(
                        "Order mixes currencies ({c} and {})",
                        tt.currency
                    )))
                },
            }
        }
        let currency = currency.unwrap_or_else(crate::db_types::default_currency);
        // Seats per ticket type, aggregated over cart lines that reference the same type.
        let mut reservations = HashMap::<i64, i64>::new();
        let mut subtotal = Money::default();
        for item in &order.items {
            let tt = types.get(&item.ticket_type_id).ok_or(SalesApiError::TicketTypeNotFound(item.ticket_type_id))?;
            *reservations.entry(tt.id).or_default() += item.quantity;
            subtotal += tt.price * item.quantity;
        }
        let taxes = subtotal.percent_bps(TAX_RATE_BPS);
        let total = subtotal + taxes;
        let order_number = orders::next_order_number(Utc::now(), &mut tx).await?;
        let draft = OrderDraft {
            order_number,
            user_id: order.user_id,
            subtotal,
            taxes,
            total,
            currency,
            notes: order.notes.clone(),
        };
        let inserted = orders::insert_order(draft, &mut tx).await?;
        for item in &order.items {
            let tt = types.get(&item.ticket_type_id).ok_or(SalesApiError::TicketTypeNotFound(item.ticket_type_id))?;
            orders::insert_order_item(inserted.id, item, tt.price, &mut tx).await?;
        }
        for (ticket_type_id, quantity) in reservations {
            catalog::decrement_stock(ticket_type_id, quantity, &mut tx).await?;
        }
        tx.commit().await?;
        info!(
            "🎫️ Order [{}] created for user {}. {} + {} tax = {}",
            inserted.order_number, inserted.user_id, inserted.subtotal, inserted.taxes, inserted.total
        );
        Ok(inserted)
    }

    /// Restores every item's seats to its ticket type. Must run in the same transaction as the status change or
    /// deletion that releases them.
    async fn release_inventory(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderItem>, SalesApiError> {
        let items = orders::fetch_order_items(order_id, &mut *conn).await?;
        let mut reservations = HashMap::<i64, i64>::new();
        items.iter().for_each(|i| *reservations.entry(i.ticket_type_id).or_default() += i.quantity);
        for (ticket_type_id, quantity) in reservations {
            catalog::restore_stock(ticket_type_id, quantity, &mut *conn).await?;
        }
        Ok(items)
    }

    /// Promotes the order to `Paid` once cumulative completed payments reach the total.
    async fn reconcile_paid(order_id: i64, conn: &mut SqliteConnection) -> Result<(), SalesApiError> {
        let order = orders::fetch_order(order_id, &mut *conn).await?.ok_or(SalesApiError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Pending {
            return Ok(());
        }
        let paid = payments::sum_completed_for_order(order_id, &mut *conn).await?;
        if paid >= order.total {
            let order = orders::update_order_status(order_id, OrderStatus::Paid, conn).await?;
            info!("🎫️ Order [{}] is fully paid ({paid} received)", order.order_number);
        }
        Ok(())
    }

    /// Promotes a paid order to `Refunded` once cumulative completed refunds reach cumulative completed payments.
    async fn reconcile_refunded(order_id: i64, conn: &mut SqliteConnection) -> Result<(), SalesApiError> {
        let order = orders::fetch_order(order_id, &mut *conn).await?.ok_or(SalesApiError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Paid {
            return Ok(());
        }
        let paid = payments::sum_completed_for_order(order_id, &mut *conn).await?;
        let refunded = refunds::sum_completed_for_order(order_id, &mut *conn).await?;
        if refunded.is_positive() && refunded >= paid {
            let order = orders::update_order_status(order_id, OrderStatus::Refunded, conn).await?;
            info!("🎫️ Order [{}] is fully refunded ({refunded} returned)", order.order_number);
        }
        Ok(())
    }

    /// Re-checks the refund caps at completion time. A refund that was within its caps when it was created can be
    /// pushed over them by other refunds completing first.
    async fn refund_would_overdraw(refund: &Refund, conn: &mut SqliteConnection) -> Result<bool, SalesApiError> {
        let payment = payments::fetch_payment(refund.payment_id, &mut *conn)
            .await?
            .ok_or(SalesApiError::PaymentNotFound(refund.payment_id))?;
        let paid = payments::sum_completed_for_order(refund.order_id, &mut *conn).await?;
        let refunded = refunds::sum_completed_for_order(refund.order_id, &mut *conn).await?;
        let refunded_for_payment = refunds::sum_completed_for_payment(refund.payment_id, &mut *conn).await?;
        Ok(refund.amount + refunded > paid || refund.amount + refunded_for_payment > payment.amount)
    }

    /// Appends a denormalised refund receipt to the originating payment's metadata. The `refunds` table remains the
    /// authoritative ledger.
    async fn append_refund_receipt(refund: &Refund, conn: &mut SqliteConnection) -> Result<(), SalesApiError> {
        let payment = payments::fetch_payment(refund.payment_id, &mut *conn)
            .await?
            .ok_or(SalesApiError::PaymentNotFound(refund.payment_id))?;
        let mut metadata = payment.metadata();
        metadata.refunds.push(RefundReceipt {
            amount: refund.amount,
            processed_at: refund.processed_at.unwrap_or_else(Utc::now),
            gateway_refund_id: new_gateway_refund_id(),
        });
        payments::replace_metadata(payment.id, &metadata, conn).await?;
        Ok(())
    }
}

impl CatalogManagement for SqliteDatabase {
    async fn fetch_ticket_type(&self, ticket_type_id: i64) -> Result<Option<TicketType>, CatalogApiError> {
        let mut conn = self.pool.acquire().await.map_err(|e| CatalogApiError::DatabaseError(e.to_string()))?;
        catalog::fetch_ticket_type(ticket_type_id, &mut conn).await
    }

    async fn fetch_ticket_types(&self, ticket_type_ids: &[i64]) -> Result<Vec<TicketType>, CatalogApiError> {
        let mut conn = self.pool.acquire().await.map_err(|e| CatalogApiError::DatabaseError(e.to_string()))?;
        catalog::fetch_ticket_types(ticket_type_ids, &mut conn).await
    }

    async fn decrement_availability(&self, ticket_type_id: i64, quantity: i64) -> Result<(), CatalogApiError> {
        let mut conn = self.pool.acquire().await.map_err(|e| CatalogApiError::DatabaseError(e.to_string()))?;
        catalog::decrement_stock(ticket_type_id, quantity, &mut conn).await
    }

    async fn restore_availability(&self, ticket_type_id: i64, quantity: i64) -> Result<(), CatalogApiError> {
        let mut conn = self.pool.acquire().await.map_err(|e| CatalogApiError::DatabaseError(e.to_string()))?;
        catalog::restore_stock(ticket_type_id, quantity, &mut conn).await
    }

    async fn fetch_user(&self, user_id: i64) -> Result<Option<UserAccount>, CatalogApiError> {
        let mut conn = self.pool.acquire().await.map_err(|e| CatalogApiError::DatabaseError(e.to_string()))?;
        catalog::fetch_user(user_id, &mut conn).await
    }
}

impl SalesDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_order(&self, order: NewOrder) -> Result<Order, SalesApiError> {
        let mut last_err = None;
        for attempt in 1..=MAX_ORDER_NUMBER_ATTEMPTS {
            match self.try_create_order(&order).await {
                Err(SalesApiError::DatabaseError(msg)) if msg.contains("orders.order_number") => {
                    warn!("🎫️ Order number collision on attempt {attempt}. Re-allocating.");
                    last_err = Some(SalesApiError::DatabaseError(msg));
                },
                result => return result,
            }
        }
        Err(last_err.unwrap_or_else(|| SalesApiError::DatabaseError("Could not allocate an order number".into())))
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_number(number, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let items = orders::fetch_order_items(order_id, &mut conn).await?;
        Ok(items)
    }

    async fn update_order(&self, order_id: i64, update: OrderUpdate) -> Result<Order, SalesApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::fetch_order(order_id, &mut tx).await?.ok_or(SalesApiError::OrderNotFound(order_id))?;
        match order.status {
            OrderStatus::Cancelled | OrderStatus::Refunded => {
                return Err(SalesApiError::invalid_transition(format!(
                    "Order [{}] is {} and cannot be modified",
                    order.order_number, order.status
                )))
            },
            _ => {},
        }
        let mut update = update;
        if let Some(new_status) = update.new_status {
            if new_status == order.status {
                update.new_status = None;
            } else if order.status == OrderStatus::Pending && new_status == OrderStatus::Cancelled {
                Self::release_inventory(order_id, &mut tx).await?;
            } else {
                return Err(SalesApiError::invalid_transition(format!(
                    "Order [{}] cannot move from {} to {new_status}",
                    order.order_number, order.status
                )));
            }
        }
        let order = orders::update_order(order_id, update, &mut tx).await?.ok_or(SalesApiError::OrderNotFound(order_id))?;
        tx.commit().await?;
        Ok(order)
    }

    async fn cancel_order(&self, order_id: i64) -> Result<Order, SalesApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::fetch_order(order_id, &mut tx).await?.ok_or(SalesApiError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(SalesApiError::invalid_transition(format!(
                "Only pending orders can be cancelled. Order [{}] is {}",
                order.order_number, order.status
            )));
        }
        let items = Self::release_inventory(order_id, &mut tx).await?;
        let order = orders::update_order_status(order_id, OrderStatus::Cancelled, &mut tx).await?;
        tx.commit().await?;
        info!("🎫️ Order [{}] cancelled. {} line(s) returned to inventory", order.order_number, items.len());
        Ok(order)
    }

    async fn delete_order(&self, order_id: i64) -> Result<(), SalesApiError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::fetch_order(order_id, &mut tx).await?.ok_or(SalesApiError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(SalesApiError::invalid_transition(format!(
                "Only pending orders can be deleted. Order [{}] is {}",
                order.order_number, order.status
            )));
        }
        Self::release_inventory(order_id, &mut tx).await?;
        orders::delete_order_items(order_id, &mut tx).await?;
        orders::delete_order(order_id, &mut tx).await?;
        tx.commit().await?;
        info!("🎫️ Order [{}] deleted", order.order_number);
        Ok(())
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, SalesApiError> {
        if !payment.amount.is_positive() {
            return Err(SalesApiError::invalid_request(format!("Payment amount must be positive, not {}", payment.amount)));
        }
        let mut tx = self.pool.begin().await?;
        let order =
            orders::fetch_order(payment.order_id, &mut tx).await?.ok_or(SalesApiError::OrderNotFound(payment.order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(SalesApiError::invalid_transition(format!(
                "Payments can only be made against pending orders. Order [{}] is {}",
                order.order_number, order.status
            )));
        }
        let paid = payments::sum_completed_for_order(order.id, &mut tx).await?;
        let outstanding = order.total - paid;
        if payment.amount > outstanding {
            return Err(SalesApiError::invalid_request(format!(
                "Payment of {} exceeds the outstanding balance of {outstanding} on order [{}]",
                payment.amount, order.order_number
            )));
        }
        let payment = payments::insert_payment(payment, &mut tx).await?;
        tx.commit().await?;
        Ok(payment)
    }

    async fn record_settlement(&self, payment_id: i64, outcome: SettlementOutcome) -> Result<Payment, SalesApiError> {
        let mut tx = self.pool.begin().await?;
        let payment =
            payments::fetch_payment(payment_id, &mut tx).await?.ok_or(SalesApiError::PaymentNotFound(payment_id))?;
        if payment.status != SettlementStatus::Pending {
            return Err(SalesApiError::invalid_transition(format!(
                "Payment [{}] has already been settled ({})",
                payment.transaction_id, payment.status
            )));
        }
        let mut metadata = payment.metadata();
        metadata.gateway_response = Some(outcome.gateway_response.clone());
        metadata.gateway_code = Some(outcome.gateway_code.clone());
        metadata.error = outcome.error.clone();
        let order = orders::fetch_order(payment.order_id, &mut tx)
            .await?
            .ok_or(SalesApiError::OrderNotFound(payment.order_id))?;
        let paid = payments::sum_completed_for_order(order.id, &mut tx).await?;
        let status = if !outcome.approved {
            SettlementStatus::Failed
        } else if paid + payment.amount > order.total {
            // Another payment completed while this one was in flight. Honouring the verdict would overpay the
            // order, so the settlement is recorded as failed instead.
            metadata.error = Some(format!(
                "Settlement of {} exceeds the outstanding balance of {} on order [{}]",
                payment.amount,
                order.total - paid,
                order.order_number
            ));
            SettlementStatus::Failed
        } else {
            metadata.processing_fee = Some(payment.amount.percent_bps(PROCESSING_FEE_BPS));
            SettlementStatus::Completed
        };
        let payment = payments::record_settlement(payment_id, status, &metadata, &mut tx).await?;
        if status == SettlementStatus::Completed {
            info!("🪙️ Payment [{}] of {} settled", payment.transaction_id, payment.amount);
            Self::reconcile_paid(payment.order_id, &mut tx).await?;
        } else {
            let reason = metadata.error.clone().unwrap_or_else(|| outcome.gateway_response.clone());
            info!(
                "🪙️ Payment [{}] of {} was not settled: {reason} (code {})",
                payment.transaction_id, payment.amount, outcome.gateway_code
            );
        }
        tx.commit().await?;
        Ok(payment)
    }

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<Payment>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment(payment_id, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payment_by_transaction_id(&self, txid: &str) -> Result<Option<Payment>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment_by_transaction_id(txid, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::fetch_payments_for_order(order_id, &mut conn).await?;
        Ok(payments)
    }

    async fn update_payment(&self, payment_id: i64, update: PaymentUpdate) -> Result<Payment, SalesApiError> {
        let mut tx = self.pool.begin().await?;
        let payment =
            payments::fetch_payment(payment_id, &mut tx).await?.ok_or(SalesApiError::PaymentNotFound(payment_id))?;
        match (payment.status, update.new_status) {
            (SettlementStatus::Completed, _) => {
                return Err(SalesApiError::invalid_transition(format!(
                    "Payment [{}] is completed and cannot be modified",
                    payment.transaction_id
                )))
            },
            (SettlementStatus::Failed, Some(s)) if s != SettlementStatus::Failed => {
                return Err(SalesApiError::invalid_transition(format!(
                    "Payment [{}] has failed and cannot be reopened",
                    payment.transaction_id
                )))
            },
            (SettlementStatus::Pending, Some(SettlementStatus::Completed)) => {
                let order = orders::fetch_order(payment.order_id, &mut tx)
                    .await?
                    .ok_or(SalesApiError::OrderNotFound(payment.order_id))?;
                let paid = payments::sum_completed_for_order(order.id, &mut tx).await?;
                if paid + payment.amount > order.total {
                    return Err(SalesApiError::invalid_transition(format!(
                        "Completing payment [{}] of {} would exceed the total of {} on order [{}]",
                        payment.transaction_id, payment.amount, order.total, order.order_number
                    )));
                }
            },
            _ => {},
        }
        let updated =
            payments::update_payment(payment_id, update, &mut tx).await?.ok_or(SalesApiError::PaymentNotFound(payment_id))?;
        if payment.status == SettlementStatus::Pending && updated.status == SettlementStatus::Completed {
            Self::reconcile_paid(updated.order_id, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_payment(&self, payment_id: i64) -> Result<(), SalesApiError> {
        let mut tx = self.pool.begin().await?;
        let payment =
            payments::fetch_payment(payment_id, &mut tx).await?.ok_or(SalesApiError::PaymentNotFound(payment_id))?;
        if payment.status == SettlementStatus::Completed {
            return Err(SalesApiError::invalid_transition(format!(
                "Payment [{}] is completed and cannot be deleted",
                payment.transaction_id
            )));
        }
        payments::delete_payment(payment_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🪙️ Payment [{}] deleted", payment.transaction_id);
        Ok(())
    }

    async fn insert_refund(&self, refund: NewRefund) -> Result<Refund, SalesApiError> {
        if !refund.amount.is_positive() {
            return Err(SalesApiError::invalid_request(format!("Refund amount must be positive, not {}", refund.amount)));
        }
        let mut tx = self.pool.begin().await?;
        let order =
            orders::fetch_order(refund.order_id, &mut tx).await?.ok_or(SalesApiError::OrderNotFound(refund.order_id))?;
        let payment = payments::fetch_payment(refund.payment_id, &mut tx)
            .await?
            .ok_or(SalesApiError::PaymentNotFound(refund.payment_id))?;
        if payment.order_id != order.id {
            return Err(SalesApiError::invalid_request(format!(
                "Payment [{}] does not belong to order [{}]",
                payment.transaction_id, order.order_number
            )));
        }
        if payment.status != SettlementStatus::Completed {
            return Err(SalesApiError::invalid_transition(format!(
                "Only completed payments can be refunded. Payment [{}] is {}",
                payment.transaction_id, payment.status
            )));
        }
        let paid = payments::sum_completed_for_order(order.id, &mut tx).await?;
        let refunded = refunds::sum_completed_for_order(order.id, &mut tx).await?;
        let refundable = paid - refunded;
        if refund.amount > refundable {
            return Err(SalesApiError::invalid_request(format!(
                "Refund of {} exceeds the refundable balance of {refundable} on order [{}]",
                refund.amount, order.order_number
            )));
        }
        // A refund may never reverse more than its own payment, even when other payments on the order leave
        // order-level headroom.
        let refunded_for_payment = refunds::sum_completed_for_payment(payment.id, &mut tx).await?;
        let payment_refundable = payment.amount - refunded_for_payment;
        if refund.amount > payment_refundable {
            return Err(SalesApiError::invalid_request(format!(
                "Refund of {} exceeds the refundable balance of {payment_refundable} on payment [{}]",
                refund.amount, payment.transaction_id
            )));
        }
        let refund = refunds::insert_refund(refund, &mut tx).await?;
        tx.commit().await?;
        Ok(refund)
    }

    async fn record_refund_settlement(
        &self,
        refund_id: i64,
        outcome: SettlementOutcome,
    ) -> Result<Refund, SalesApiError> {
        let mut tx = self.pool.begin().await?;
        let refund = refunds::fetch_refund(refund_id, &mut tx).await?.ok_or(SalesApiError::RefundNotFound(refund_id))?;
        if refund.status != SettlementStatus::Pending {
            return Err(SalesApiError::invalid_transition(format!(
                "Refund {refund_id} has already been settled ({})",
                refund.status
            )));
        }
        let status = if !outcome.approved {
            SettlementStatus::Failed
        } else if Self::refund_would_overdraw(&refund, &mut tx).await? {
            // Another refund completed while this one was pending; honouring it now would over-refund.
            warn!("↩️ Refund {refund_id} of {} can no longer be honoured. Recording it as failed.", refund.amount);
            SettlementStatus::Failed
        } else {
            SettlementStatus::Completed
        };
        let refund = refunds::record_settlement(refund_id, status, &mut tx).await?;
        if status == SettlementStatus::Completed {
            Self::append_refund_receipt(&refund, &mut tx).await?;
            Self::reconcile_refunded(refund.order_id, &mut tx).await?;
            info!("↩️ Refund {refund_id} of {} settled against payment {}", refund.amount, refund.payment_id);
        } else {
            info!(
                "↩️ Refund {refund_id} of {} was not settled: {} (code {})",
                refund.amount, outcome.gateway_response, outcome.gateway_code
            );
        }
        tx.commit().await?;
        Ok(refund)
    }

    async fn fetch_refund(&self, refund_id: i64) -> Result<Option<Refund>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let refund = refunds::fetch_refund(refund_id, &mut conn).await?;
        Ok(refund)
    }

    async fn fetch_refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let refunds = refunds::fetch_refunds_for_order(order_id, &mut conn).await?;
        Ok(refunds)
    }

    async fn update_refund(&self, refund_id: i64, update: RefundUpdate) -> Result<Refund, SalesApiError> {
        let mut tx = self.pool.begin().await?;
        let refund = refunds::fetch_refund(refund_id, &mut tx).await?.ok_or(SalesApiError::RefundNotFound(refund_id))?;
        match (refund.status, update.new_status) {
            (SettlementStatus::Completed, _) => {
                return Err(SalesApiError::invalid_transition(format!(
                    "Refund {refund_id} is completed and cannot be modified"
                )))
            },
            (SettlementStatus::Failed, Some(s)) if s != SettlementStatus::Failed => {
                return Err(SalesApiError::invalid_transition(format!("Refund {refund_id} has failed and cannot be reopened")))
            },
            (SettlementStatus::Pending, Some(SettlementStatus::Completed)) => {
                if Self::refund_would_overdraw(&refund, &mut tx).await? {
                    return Err(SalesApiError::invalid_transition(format!(
                        "Completing refund {refund_id} of {} would exceed the refundable balance",
                        refund.amount
                    )));
                }
            },
            _ => {},
        }
        let updated =
            refunds::update_refund(refund_id, update, &mut tx).await?.ok_or(SalesApiError::RefundNotFound(refund_id))?;
        if refund.status == SettlementStatus::Pending && updated.status == SettlementStatus::Completed {
            Self::append_refund_receipt(&updated, &mut tx).await?;
            Self::reconcile_refunded(updated.order_id, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn close(&mut self) -> Result<(), SalesApiError> {
        self.pool.close().await;
        Ok(())
    }
}

impl SalesReporting for SqliteDatabase {
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::search_orders(query, &mut conn).await?;
        Ok(orders)
    }

    async fn order_statistics(&self) -> Result<OrderStatistics, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let stats = orders::order_statistics(&mut conn).await?;
        Ok(stats)
    }

    async fn fetch_payments_by_method(&self, method: PaymentMethod) -> Result<Vec<Payment>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::fetch_payments_by_method(method, &mut conn).await?;
        Ok(payments)
    }

    async fn fetch_payments_by_status(&self, status: SettlementStatus) -> Result<Vec<Payment>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::fetch_payments_by_status(status, &mut conn).await?;
        Ok(payments)
    }

    async fn fetch_payments_for_user(&self, user_id: i64) -> Result<Vec<Payment>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::fetch_payments_for_user(user_id, &mut conn).await?;
        Ok(payments)
    }

    async fn search_payments(&self, term: &str) -> Result<Vec<Payment>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::search_payments(term, &mut conn).await?;
        Ok(payments)
    }

    async fn payment_statistics(&self) -> Result<PaymentStatistics, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let stats = payments::payment_statistics(&mut conn).await?;
        Ok(stats)
    }

    async fn payment_trends(&self, days: i64) -> Result<Vec<PaymentTrendPoint>, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let trends = payments::payment_trends(days, &mut conn).await?;
        Ok(trends)
    }

    async fn refund_statistics(&self) -> Result<RefundStatistics, SalesApiError> {
        let mut conn = self.pool.acquire().await?;
        let stats = refunds::refund_statistics(&mut conn).await?;
        Ok(stats)
    }
}
