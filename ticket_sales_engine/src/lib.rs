//! Ticket Sales Engine
//!
//! The Ticket Sales Engine contains the core logic for a ticket vendor's sales transactions: orders, payments and
//! refunds. It is presentation-agnostic; event catalogs, seat maps and HTTP surfaces live elsewhere and talk to
//! this library through its public API.
//!
//! The library is divided into two main sections:
//! 1. Database management and control ([`mod@sqlite`]). SQLite is the supported backend. You should never need to
//!    access the database directly. Instead, use the public API provided by the engine. The exception is the data
//!    types used in the database. These are defined in the `db_types` module and are public.
//! 2. The engine public API ([`mod@sales_api`]). This provides the public-facing functionality: building orders,
//!    driving payments and refunds through settlement, and reporting. Specific backends need to implement the
//!    traits in the [`mod@traits`] module in order to act as a backend for the engine.
//!
//! Settlement against the (simulated) payment gateway sits behind the [`gateway::SettlementGateway`] trait, so the
//! random production gateway can be swapped for a deterministic one in tests.
pub mod db_types;
pub mod gateway;
pub mod helpers;
mod sales_api;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use sales_api::{order_flow_api::OrderFlowApi, order_objects, payment_objects, reports_api::ReportsApi};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{CatalogManagement, SalesDatabase, SalesReporting};
