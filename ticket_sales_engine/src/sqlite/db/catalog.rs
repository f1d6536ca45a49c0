use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{TicketType, UserAccount},
    traits::CatalogApiError,
};

pub async fn fetch_ticket_type(
    ticket_type_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<TicketType>, CatalogApiError> {
    let tt = sqlx::query_as("SELECT * FROM ticket_types WHERE id = $1")
        .bind(ticket_type_id)
        .fetch_optional(conn)
        .await?;
    Ok(tt)
}

/// Resolves a batch of ticket-type ids in one query. Unknown ids are absent from the result.
pub async fn fetch_ticket_types(
    ticket_type_ids: &[i64],
    conn: &mut SqliteConnection,
) -> Result<Vec<TicketType>, CatalogApiError> {
    if ticket_type_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT * FROM ticket_types WHERE id IN (");
    let mut in_list = builder.separated(", ");
    for id in ticket_type_ids {
        in_list.push_bind(*id);
    }
    builder.push(")");
    let types = builder.build_query_as::<TicketType>().fetch_all(conn).await?;
    Ok(types)
}

/// Reserves `quantity` seats on a ticket type with a guarded single-statement decrement. The availability check and
/// the write happen in one statement, so concurrent reservations can never oversell.
pub async fn decrement_stock(
    ticket_type_id: i64,
    quantity: i64,
    conn: &mut SqliteConnection,
) -> Result<(), CatalogApiError> {
    let result = sqlx::query(
        "UPDATE ticket_types SET remaining_quantity = remaining_quantity - $1, updated_at = CURRENT_TIMESTAMP \
         WHERE id = $2 AND remaining_quantity >= $1",
    )
    .bind(quantity)
    .bind(ticket_type_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        // Either the id is unknown or there were not enough seats left.
        return match fetch_ticket_type(ticket_type_id, conn).await? {
            Some(_) => Err(CatalogApiError::InsufficientStock { ticket_type_id, requested: quantity }),
            None => Err(CatalogApiError::TicketTypeNotFound(ticket_type_id)),
        };
    }
    Ok(())
}

/// Returns previously reserved seats to the availability counter.
pub async fn restore_stock(
    ticket_type_id: i64,
    quantity: i64,
    conn: &mut SqliteConnection,
) -> Result<(), CatalogApiError> {
    let result = sqlx::query(
        "UPDATE ticket_types SET remaining_quantity = remaining_quantity + $1, updated_at = CURRENT_TIMESTAMP \
         WHERE id = $2",
    )
    .bind(quantity)
    .bind(ticket_type_id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CatalogApiError::TicketTypeNotFound(ticket_type_id));
    }
    Ok(())
}

pub async fn fetch_user(user_id: i64, conn: &mut SqliteConnection) -> Result<Option<UserAccount>, CatalogApiError> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(user_id).fetch_optional(conn).await?;
    Ok(user)
}
