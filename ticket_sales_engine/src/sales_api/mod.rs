//! # Ticket sales engine public API
//!
//! The `sales_api` module exposes the programmatic API for the ticket sales engine. The API is modular, so that
//! clients can pick and choose the functionality they want, or run different parts (e.g. order flow and reporting)
//! on different machines.
//!
//! * [`order_flow_api`] is the primary API for the sales transaction lifecycle: building orders, taking payments
//!   through their settlement step, and issuing refunds.
//! * [`reports_api`] provides the read-only query and statistics surface.
//!
//! # API usage
//!
//! The pattern for using the APIs is the same. An API instance is created by supplying a database backend that
//! implements the backend traits required by the API.
//!
//! ```rust,ignore
//! use ticket_sales_engine::{gateway::RandomGateway, OrderFlowApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! // SqliteDatabase implements SalesDatabase
//! let api = OrderFlowApi::new(db, RandomGateway::default());
//! let order = api.create_order(new_order).await?;
//! ```

pub mod order_flow_api;
pub mod order_objects;
pub mod payment_objects;
pub mod reports_api;

pub use order_flow_api::OrderFlowApi;
pub use reports_api::ReportsApi;
