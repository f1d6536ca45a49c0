use log::{debug, trace};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, SqliteConnection};
use tse_common::Money;

use crate::{
    db_types::{NewPayment, Payment, PaymentMetadata, PaymentMethod, SettlementStatus},
    payment_objects::{MethodBreakdown, PaymentStatistics, PaymentTrendPoint, PaymentUpdate},
    traits::SalesApiError,
};

/// Inserts a payment in `Pending` status. A transaction id is generated when the request does not carry one;
/// either way the UNIQUE constraint on `transaction_id` converts a collision into `DuplicateTransactionId`.
pub(crate) async fn insert_payment(payment: NewPayment, conn: &mut SqliteConnection) -> Result<Payment, SalesApiError> {
    let txid = payment.transaction_id.clone().unwrap_or_else(crate::helpers::new_transaction_id);
    let metadata = payment.metadata.clone().map(sqlx::types::Json);
    let result: Result<Payment, sqlx::Error> = sqlx::query_as(
        r#"
            INSERT INTO payments (transaction_id, order_id, amount, method, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(txid.clone())
    .bind(payment.order_id)
    .bind(payment.amount)
    .bind(payment.method.to_string())
    .bind(metadata)
    .fetch_one(conn)
    .await;
    match result {
        Ok(p) => {
            debug!("🪙️ Payment [{}] recorded against order {}", p.transaction_id, p.order_id);
            Ok(p)
        },
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(SalesApiError::DuplicateTransactionId(txid)),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(payment_id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_payment_by_transaction_id(
    transaction_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE transaction_id = $1")
        .bind(transaction_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

pub async fn fetch_payments_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Payment>, sqlx::Error> {
    let payments = sqlx::query_as("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at DESC")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(payments)
}

/// The sum of all settled payments against the order. Pending and failed payments do not count towards the
/// order's paid balance.
pub async fn sum_completed_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let total: Money = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE order_id = $1 AND status = 'Completed'",
    )
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    Ok(total)
}

/// Stamps the gateway's verdict onto a pending payment. Status, metadata and the settlement timestamp are written
/// in a single statement.
pub(crate) async fn record_settlement(
    payment_id: i64,
    status: SettlementStatus,
    metadata: &PaymentMetadata,
    conn: &mut SqliteConnection,
) -> Result<Payment, SalesApiError> {
    let result: Option<Payment> = sqlx::query_as(
        r#"
            UPDATE payments
            SET status = $1, metadata = $2, processed_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING *;
        "#,
    )
    .bind(status.to_string())
    .bind(sqlx::types::Json(metadata))
    .bind(payment_id)
    .fetch_optional(conn)
    .await?;
    result.ok_or(SalesApiError::PaymentNotFound(payment_id))
}

pub(crate) async fn replace_metadata(
    payment_id: i64,
    metadata: &PaymentMetadata,
    conn: &mut SqliteConnection,
) -> Result<Payment, SalesApiError> {
    let result: Option<Payment> =
        sqlx::query_as("UPDATE payments SET metadata = $1 WHERE id = $2 RETURNING *")
            .bind(sqlx::types::Json(metadata))
            .bind(payment_id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(SalesApiError::PaymentNotFound(payment_id))
}

pub(crate) async fn update_payment(
    payment_id: i64,
    update: PaymentUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, SalesApiError> {
    if update.is_empty() {
        debug!("🪙️ No fields to update for payment {payment_id}. Update request skipped.");
        return fetch_payment(payment_id, conn).await.map_err(SalesApiError::from);
    }
    let mut builder = QueryBuilder::new("UPDATE payments SET ");
    let mut set_clause = builder.separated(", ");
    if let Some(status) = update.new_status {
        set_clause.push("status = ");
        set_clause.push_bind_unseparated(status.to_string());
        if status != SettlementStatus::Pending {
            set_clause.push("processed_at = CURRENT_TIMESTAMP");
        }
    }
    if let Some(metadata) = update.new_metadata {
        set_clause.push("metadata = ");
        set_clause.push_bind_unseparated(sqlx::types::Json(metadata));
    }
    builder.push(" WHERE id = ");
    builder.push_bind(payment_id);
    builder.push(" RETURNING *");
    trace!("🪙️ Executing query: {}", builder.sql());
    let res = builder.build().fetch_optional(conn).await?.map(|row: SqliteRow| Payment::from_row(&row)).transpose()?;
    Ok(res)
}

pub async fn delete_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM payments WHERE id = $1").bind(payment_id).execute(conn).await?;
    Ok(result.rows_affected())
}

pub async fn fetch_payments_by_status(
    status: SettlementStatus,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    let payments = sqlx::query_as("SELECT * FROM payments WHERE status = $1 ORDER BY created_at DESC")
        .bind(status.to_string())
        .fetch_all(conn)
        .await?;
    Ok(payments)
}

pub async fn fetch_payments_by_method(
    method: PaymentMethod,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    let payments = sqlx::query_as("SELECT * FROM payments WHERE method = $1 ORDER BY created_at DESC")
        .bind(method.to_string())
        .fetch_all(conn)
        .await?;
    Ok(payments)
}

pub async fn fetch_payments_for_user(user_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Payment>, sqlx::Error> {
    let payments = sqlx::query_as(
        r#"
            SELECT payments.* FROM payments
            JOIN orders ON orders.id = payments.order_id
            WHERE orders.user_id = $1
            ORDER BY payments.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(payments)
}

/// Free-text search over transaction ids and the associated order numbers.
pub async fn search_payments(term: &str, conn: &mut SqliteConnection) -> Result<Vec<Payment>, sqlx::Error> {
    let pattern = format!("%{term}%");
    let payments = sqlx::query_as(
        r#"
            SELECT payments.* FROM payments
            JOIN orders ON orders.id = payments.order_id
            WHERE payments.transaction_id LIKE $1 OR orders.order_number LIKE $1
            ORDER BY payments.created_at DESC
        "#,
    )
    .bind(pattern)
    .fetch_all(conn)
    .await?;
    Ok(payments)
}

#[derive(Debug, FromRow)]
struct PaymentStatsRow {
    total_payments: i64,
    completed: i64,
    pending: i64,
    failed: i64,
    average_amount: Option<f64>,
    total_revenue: Money,
}

pub async fn payment_statistics(conn: &mut SqliteConnection) -> Result<PaymentStatistics, sqlx::Error> {
    let row: PaymentStatsRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*)                                                         AS total_payments,
            COALESCE(SUM(status = 'Completed'), 0)                           AS completed,
            COALESCE(SUM(status = 'Pending'), 0)                             AS pending,
            COALESCE(SUM(status = 'Failed'), 0)                              AS failed,
            AVG(CASE WHEN status = 'Completed' THEN amount END)              AS average_amount,
            COALESCE(SUM(CASE WHEN status = 'Completed' THEN amount END), 0) AS total_revenue
        FROM payments
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;
    let by_method: Vec<MethodBreakdown> = sqlx::query_as(
        r#"
        SELECT method, COUNT(*) AS count, COALESCE(SUM(amount), 0) AS total
        FROM payments
        WHERE status = 'Completed'
        GROUP BY method
        ORDER BY total DESC
        "#,
    )
    .fetch_all(conn)
    .await?;
    let success_rate = if row.total_payments > 0 { row.completed as f64 / row.total_payments as f64 } else { 0.0 };
    let estimated_fees = row.total_revenue.percent_bps(crate::db_types::PROCESSING_FEE_BPS);
    Ok(PaymentStatistics {
        total: row.total_payments,
        completed: row.completed,
        pending: row.pending,
        failed: row.failed,
        success_rate,
        average_amount: Money::from_cents(average_cents(row.average_amount)),
        total_revenue: row.total_revenue,
        estimated_fees,
        net_revenue: row.total_revenue - estimated_fees,
        by_method,
    })
}

fn average_cents(avg: Option<f64>) -> i64 {
    avg.map(|a| a.round() as i64).unwrap_or_default()
}

/// Daily settled-payment counts and amounts for the trailing `days`-day window.
pub async fn payment_trends(days: i64, conn: &mut SqliteConnection) -> Result<Vec<PaymentTrendPoint>, sqlx::Error> {
    let window = format!("-{days} days");
    let points = sqlx::query_as(
        r#"
        SELECT
            DATE(processed_at)          AS date,
            COUNT(*)                    AS count,
            COALESCE(SUM(amount), 0)    AS amount
        FROM payments
        WHERE status = 'Completed' AND processed_at >= datetime('now', $1)
        GROUP BY DATE(processed_at)
        ORDER BY date ASC
        "#,
    )
    .bind(window)
    .fetch_all(conn)
    .await?;
    Ok(points)
}
