//! # Backend contracts for the ticket sales engine.
//!
//! This module defines the behaviour a database backend must expose to support the sales transaction subsystem.
//!
//! * [`SalesDatabase`] covers the Order / Payment / Refund lifecycle: order building, status reconciliation,
//!   settlement bookkeeping and the hard rules around legal status transitions.
//! * [`SalesReporting`] provides the query surface: filtered and free-text searches plus aggregate statistics.
//! * [`CatalogManagement`] is the contract with the external catalog/user collaborator: ticket-type resolution,
//!   atomic availability adjustments, and buyer-account lookups.
mod catalog_management;
mod sales_database;

pub use catalog_management::{CatalogApiError, CatalogManagement};
pub use sales_database::{SalesApiError, SalesDatabase, SalesReporting};
