use log::{debug, trace};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, SqliteConnection};
use tse_common::Money;

use crate::{
    db_types::{NewRefund, Refund, SettlementStatus},
    payment_objects::{RefundStatistics, RefundUpdate},
    traits::SalesApiError,
};

pub(crate) async fn insert_refund(refund: NewRefund, conn: &mut SqliteConnection) -> Result<Refund, SalesApiError> {
    let refund: Refund = sqlx::query_as(
        r#"
            INSERT INTO refunds (order_id, payment_id, amount, reason, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(refund.order_id)
    .bind(refund.payment_id)
    .bind(refund.amount)
    .bind(refund.reason.to_string())
    .bind(refund.notes)
    .fetch_one(conn)
    .await?;
    debug!("↩️ Refund of {} recorded against payment {}", refund.amount, refund.payment_id);
    Ok(refund)
}

pub async fn fetch_refund(refund_id: i64, conn: &mut SqliteConnection) -> Result<Option<Refund>, sqlx::Error> {
    let refund = sqlx::query_as("SELECT * FROM refunds WHERE id = $1").bind(refund_id).fetch_optional(conn).await?;
    Ok(refund)
}

pub async fn fetch_refunds_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Refund>, sqlx::Error> {
    let refunds = sqlx::query_as("SELECT * FROM refunds WHERE order_id = $1 ORDER BY created_at DESC")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(refunds)
}

/// The sum of settled refunds against the order. This is the authoritative refunded total; the receipts stored in
/// payment metadata are derived from it.
pub async fn sum_completed_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let total: Money = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE order_id = $1 AND status = 'Completed'",
    )
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    Ok(total)
}

/// The sum of settled refunds that reference the given payment.
pub async fn sum_completed_for_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let total: Money = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE payment_id = $1 AND status = 'Completed'",
    )
    .bind(payment_id)
    .fetch_one(conn)
    .await?;
    Ok(total)
}

pub(crate) async fn record_settlement(
    refund_id: i64,
    status: SettlementStatus,
    conn: &mut SqliteConnection,
) -> Result<Refund, SalesApiError> {
    let result: Option<Refund> = sqlx::query_as(
        "UPDATE refunds SET status = $1, processed_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
    )
    .bind(status.to_string())
    .bind(refund_id)
    .fetch_optional(conn)
    .await?;
    result.ok_or(SalesApiError::RefundNotFound(refund_id))
}

pub(crate) async fn update_refund(
    refund_id: i64,
    update: RefundUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, SalesApiError> {
    if update.is_empty() {
        debug!("↩️ No fields to update for refund {refund_id}. Update request skipped.");
        return fetch_refund(refund_id, conn).await.map_err(SalesApiError::from);
    }
    let mut builder = QueryBuilder::new("UPDATE refunds SET ");
    let mut set_clause = builder.separated(", ");
    if let Some(status) = update.new_status {
        set_clause.push("status = ");
        set_clause.push_bind_unseparated(status.to_string());
        if status != SettlementStatus::Pending {
            set_clause.push("processed_at = CURRENT_TIMESTAMP");
        }
    }
    if let Some(notes) = update.new_notes {
        set_clause.push("notes = ");
        set_clause.push_bind_unseparated(notes);
    }
    builder.push(" WHERE id = ");
    builder.push_bind(refund_id);
    builder.push(" RETURNING *");
    trace!("↩️ Executing query: {}", builder.sql());
    let res = builder.build().fetch_optional(conn).await?.map(|row: SqliteRow| Refund::from_row(&row)).transpose()?;
    Ok(res)
}

#[derive(Debug, FromRow)]
struct RefundStatsRow {
    total_refunds: i64,
    completed: i64,
    pending: i64,
    failed: i64,
    total_amount: Money,
}

pub async fn refund_statistics(conn: &mut SqliteConnection) -> Result<RefundStatistics, sqlx::Error> {
    let row: RefundStatsRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*)                                                         AS total_refunds,
            COALESCE(SUM(status = 'Completed'), 0)                           AS completed,
            COALESCE(SUM(status = 'Pending'), 0)                             AS pending,
            COALESCE(SUM(status = 'Failed'), 0)                              AS failed,
            COALESCE(SUM(CASE WHEN status = 'Completed' THEN amount END), 0) AS total_amount
        FROM refunds
        "#,
    )
    .fetch_one(conn)
    .await?;
    Ok(RefundStatistics {
        total: row.total_refunds,
        completed: row.completed,
        pending: row.pending,
        failed: row.failed,
        total_amount: row.total_amount,
    })
}
