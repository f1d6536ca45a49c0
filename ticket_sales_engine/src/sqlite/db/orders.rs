use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, SqliteConnection};
use tse_common::Money;

use crate::{
    db_types::{NewOrderItem, Order, OrderItem, OrderNumber, OrderStatus},
    order_objects::{OrderQueryFilter, OrderStatistics, OrderUpdate},
    traits::SalesApiError,
};

/// The fully computed column values for a new order row. Totals are computed by the caller so that the
/// `total == subtotal + taxes` invariant is established before anything touches the database.
#[derive(Debug, Clone)]
pub(crate) struct OrderDraft {
    pub order_number: OrderNumber,
    pub user_id: i64,
    pub subtotal: Money,
    pub taxes: Money,
    pub total: Money,
    pub currency: String,
    pub notes: Option<String>,
}

/// Allocates the next order number for the month containing `timestamp`.
///
/// The sequence is derived from the maximum existing number under the month prefix. This must run inside the same
/// transaction as the order insert; the UNIQUE constraint on `order_number` catches the race between two
/// allocations, and order creation retries on that violation.
pub async fn next_order_number(
    timestamp: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<OrderNumber, SalesApiError> {
    let prefix = OrderNumber::month_prefix(timestamp);
    // Compare on the numeric suffix. A string MAX would go wrong once a month passes sequence 9999, since
    // '...-10000' sorts below '...-9999'.
    let last: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(CAST(SUBSTR(order_number, $1) AS INTEGER)) FROM orders WHERE order_number LIKE $2",
    )
    .bind(prefix.len() as i64 + 1)
    .bind(format!("{prefix}%"))
    .fetch_one(conn)
    .await?;
    let next = last.map(|seq| seq as u32 + 1).unwrap_or(1);
    Ok(OrderNumber::from_sequence(timestamp, next))
}

pub(crate) async fn insert_order(draft: OrderDraft, conn: &mut SqliteConnection) -> Result<Order, SalesApiError> {
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_number,
                user_id,
                subtotal,
                taxes,
                total,
                currency,
                notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(draft.order_number)
    .bind(draft.user_id)
    .bind(draft.subtotal)
    .bind(draft.taxes)
    .bind(draft.total)
    .bind(draft.currency)
    .bind(draft.notes)
    .fetch_one(conn)
    .await?;
    debug!("📝️ Order [{}] inserted with id {}", order.order_number, order.id);
    Ok(order)
}

/// Inserts one order line. `unit_price` is the catalog price snapshotted by the order builder.
pub async fn insert_order_item(
    order_id: i64,
    item: &NewOrderItem,
    unit_price: Money,
    conn: &mut SqliteConnection,
) -> Result<OrderItem, SalesApiError> {
    let details = item.ticket_details.clone().map(sqlx::types::Json);
    let item = sqlx::query_as(
        r#"
            INSERT INTO order_items (order_id, ticket_type_id, quantity, unit_price, total_price, ticket_details)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(item.ticket_type_id)
    .bind(item.quantity)
    .bind(unit_price)
    .bind(unit_price * item.quantity)
    .bind(details)
    .fetch_one(conn)
    .await?;
    Ok(item)
}

pub async fn fetch_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_number(
    number: &OrderNumber,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_number = $1").bind(number.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_items(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderItem>, sqlx::Error> {
    let items = sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id ASC")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(items)
}

pub(crate) async fn update_order_status(
    order_id: i64,
    status: OrderStatus,
    conn: &mut SqliteConnection,
) -> Result<Order, SalesApiError> {
    let result: Option<Order> =
        sqlx::query_as("UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status.to_string())
            .bind(order_id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(SalesApiError::OrderNotFound(order_id))
}

pub(crate) async fn update_order(
    order_id: i64,
    update: OrderUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SalesApiError> {
    if update.is_empty() {
        debug!("📝️ No fields to update for order {order_id}. Update request skipped.");
        return fetch_order(order_id, conn).await.map_err(SalesApiError::from);
    }
    let mut builder = QueryBuilder::new("UPDATE orders SET updated_at = CURRENT_TIMESTAMP, ");
    let mut set_clause = builder.separated(", ");
    if let Some(status) = update.new_status {
        set_clause.push("status = ");
        set_clause.push_bind_unseparated(status.to_string());
    }
    if let Some(notes) = update.new_notes {
        set_clause.push("notes = ");
        set_clause.push_bind_unseparated(notes);
    }
    builder.push(" WHERE id = ");
    builder.push_bind(order_id);
    builder.push(" RETURNING *");
    trace!("📝️ Executing query: {}", builder.sql());
    let res = builder.build().fetch_optional(conn).await?.map(|row: SqliteRow| Order::from_row(&row)).transpose()?;
    Ok(res)
}

pub async fn delete_order_items(order_id: i64, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM order_items WHERE order_id = $1").bind(order_id).execute(conn).await?;
    Ok(result.rows_affected())
}

pub async fn delete_order(order_id: i64, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM orders WHERE id = $1").bind(order_id).execute(conn).await?;
    Ok(result.rows_affected())
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`.
///
/// The free-text term is matched against the order number, the buyer's email and the names of the ticket types on
/// the order. Resulting orders are ordered by `created_at` in descending order.
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT orders.* FROM orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(user_id) = query.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id);
    }
    if let Some(term) = query.search_term {
        let pattern = format!("%{term}%");
        where_clause.push("(order_number LIKE ");
        where_clause.push_bind_unseparated(pattern.clone());
        where_clause.push_unseparated(" OR EXISTS (SELECT 1 FROM users WHERE users.id = orders.user_id AND users.email LIKE ");
        where_clause.push_bind_unseparated(pattern.clone());
        where_clause.push_unseparated(
            ") OR EXISTS (SELECT 1 FROM order_items JOIN ticket_types ON ticket_types.id = order_items.ticket_type_id \
             WHERE order_items.order_id = orders.id AND ticket_types.name LIKE ",
        );
        where_clause.push_bind_unseparated(pattern);
        where_clause.push_unseparated("))");
    }
    if let Some(statuses) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status_clause = statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<String>>().join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    if let Some(since) = query.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    builder.push(" ORDER BY created_at DESC");

    trace!("📝️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<Order>();
    let orders = query.fetch_all(conn).await?;
    trace!("Result of search_orders: {:?}", orders.len());
    Ok(orders)
}

#[derive(Debug, FromRow)]
struct OrderStatsRow {
    total_orders: i64,
    pending: i64,
    paid: i64,
    cancelled: i64,
    refunded: i64,
    revenue: Money,
    today: i64,
}

pub async fn order_statistics(conn: &mut SqliteConnection) -> Result<OrderStatistics, sqlx::Error> {
    let row: OrderStatsRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*)                                                    AS total_orders,
            COALESCE(SUM(status = 'Pending'), 0)                        AS pending,
            COALESCE(SUM(status = 'Paid'), 0)                           AS paid,
            COALESCE(SUM(status = 'Cancelled'), 0)                      AS cancelled,
            COALESCE(SUM(status = 'Refunded'), 0)                       AS refunded,
            COALESCE(SUM(CASE WHEN status = 'Paid' THEN total END), 0)  AS revenue,
            COALESCE(SUM(DATE(created_at) = DATE('now')), 0)            AS today
        FROM orders
        "#,
    )
    .fetch_one(conn)
    .await?;
    Ok(OrderStatistics {
        total: row.total_orders,
        pending: row.pending,
        paid: row.paid,
        cancelled: row.cancelled,
        refunded: row.refunded,
        revenue: row.revenue,
        today: row.today,
    })
}
