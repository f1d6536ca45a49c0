//! Read-only query and statistics surface over the sales records.

use std::fmt::Debug;

use log::trace;

use crate::{
    db_types::{Order, Payment, PaymentMethod, SettlementStatus},
    order_objects::{OrderQueryFilter, OrderStatistics},
    payment_objects::{PaymentStatistics, PaymentTrendPoint, RefundStatistics},
    traits::{SalesApiError, SalesReporting},
};

pub struct ReportsApi<B> {
    db: B,
}

impl<B: Debug> Debug for ReportsApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReportsApi ({:?})", self.db)
    }
}

impl<B> ReportsApi<B>
where B: SalesReporting
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Fetches orders according to criteria specified in the `OrderQueryFilter`.
    pub async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, SalesApiError> {
        trace!("📊️ Order search requested. {query}");
        self.db.search_orders(query).await
    }

    pub async fn order_statistics(&self) -> Result<OrderStatistics, SalesApiError> {
        self.db.order_statistics().await
    }

    pub async fn payments_by_method(&self, method: PaymentMethod) -> Result<Vec<Payment>, SalesApiError> {
        self.db.fetch_payments_by_method(method).await
    }

    pub async fn payments_by_status(&self, status: SettlementStatus) -> Result<Vec<Payment>, SalesApiError> {
        self.db.fetch_payments_by_status(status).await
    }

    pub async fn payments_for_user(&self, user_id: i64) -> Result<Vec<Payment>, SalesApiError> {
        self.db.fetch_payments_for_user(user_id).await
    }

    /// Free-text search across transaction id and order number.
    pub async fn search_payments(&self, term: &str) -> Result<Vec<Payment>, SalesApiError> {
        self.db.search_payments(term).await
    }

    pub async fn payment_statistics(&self) -> Result<PaymentStatistics, SalesApiError> {
        self.db.payment_statistics().await
    }

    /// Completed-payment series bucketed by day for the trailing `days` window.
    pub async fn payment_trends(&self, days: i64) -> Result<Vec<PaymentTrendPoint>, SalesApiError> {
        self.db.payment_trends(days).await
    }

    pub async fn refund_statistics(&self) -> Result<RefundStatistics, SalesApiError> {
        self.db.refund_statistics().await
    }
}
