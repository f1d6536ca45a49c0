use thiserror::Error;

use crate::db_types::{TicketType, UserAccount};

/// The contract the sales flows require from the catalog and user-profile collaborator.
///
/// Availability adjustments must be atomic compare-and-write operations: two concurrent orders against a ticket
/// type with N remaining seats may never sell more than N seats between them.
#[allow(async_fn_in_trait)]
pub trait CatalogManagement {
    /// Resolves a single ticket type. Returns `None` if the id is unknown.
    async fn fetch_ticket_type(&self, ticket_type_id: i64) -> Result<Option<TicketType>, CatalogApiError>;

    /// Resolves a batch of ticket-type ids. Unknown ids are simply absent from the result.
    async fn fetch_ticket_types(&self, ticket_type_ids: &[i64]) -> Result<Vec<TicketType>, CatalogApiError>;

    /// Atomically decrements the remaining availability of a ticket type.
    /// Fails with [`CatalogApiError::InsufficientStock`] if fewer than `quantity` seats remain.
    async fn decrement_availability(&self, ticket_type_id: i64, quantity: i64) -> Result<(), CatalogApiError>;

    /// Returns previously reserved seats to a ticket type's availability counter.
    async fn restore_availability(&self, ticket_type_id: i64, quantity: i64) -> Result<(), CatalogApiError>;

    /// Resolves a buyer account. Returns `None` if the id is unknown. Soft-deleted accounts are returned with
    /// `is_active == false`; callers decide whether that matters.
    async fn fetch_user(&self, user_id: i64) -> Result<Option<UserAccount>, CatalogApiError>;
}

#[derive(Debug, Clone, Error)]
pub enum CatalogApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Ticket type {0} does not exist")]
    TicketTypeNotFound(i64),
    #[error("Not enough availability on ticket type {ticket_type_id}: requested {requested}")]
    InsufficientStock { ticket_type_id: i64, requested: i64 },
    #[error("User {0} does not exist")]
    UserNotFound(i64),
}

impl From<sqlx::Error> for CatalogApiError {
    fn from(e: sqlx::Error) -> Self {
        CatalogApiError::DatabaseError(e.to_string())
    }
}
