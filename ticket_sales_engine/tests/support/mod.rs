#![allow(dead_code)]
//! Shared scaffolding for the integration tests: a throwaway database per test, schema migration, seed helpers and
//! deterministic settlement gateways.

use log::*;
use sqlx::{migrate, migrate::MigrateDatabase, Sqlite};
use ticket_sales_engine::{
    gateway::{GatewayError, SettlementGateway, SettlementKind, SettlementOutcome, SettlementRequest},
    OrderFlowApi,
    SqliteDatabase,
};
use tse_common::Money;

pub async fn prepare_test_env(url: &str) {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    debug!("🚀️ Logging initialised");
    create_database(url).await;
    run_migrations(url).await;
}

pub fn random_db_path() -> String {
    format!("sqlite://../data/test_sales_{}.db", rand::random::<u64>())
}

pub async fn run_migrations(url: &str) {
    let db = SqliteDatabase::new_with_url(url, 5).await.expect("Error creating connection to database");
    migrate!("./src/sqlite/migrations").run(db.pool()).await.expect("Error running DB migrations");
    info!("🚀️ Migrations complete");
}

pub async fn create_database(url: &str) {
    std::fs::create_dir_all("../data").expect("Error creating data directory");
    if let Err(e) = Sqlite::drop_database(url).await {
        warn!("Error dropping database {url}: {e:?}");
    }
    Sqlite::create_database(url).await.expect("Error creating database");
    info!("Created Sqlite database {url}");
}

/// A fresh database with the schema applied, plus an order-flow API using the given gateway.
pub async fn new_api<G: SettlementGateway>(gateway: G) -> (SqliteDatabase, OrderFlowApi<SqliteDatabase, G>) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let api = OrderFlowApi::new(db.clone(), gateway);
    (db, api)
}

pub async fn seed_user(db: &SqliteDatabase, email: &str, is_active: bool) -> i64 {
    sqlx::query_scalar("INSERT INTO users (email, is_active) VALUES ($1, $2) RETURNING id")
        .bind(email)
        .bind(is_active)
        .fetch_one(db.pool())
        .await
        .expect("Error seeding user")
}

pub async fn seed_ticket_type(db: &SqliteDatabase, name: &str, price: Money, quantity: i64, is_active: bool) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO ticket_types (name, price, currency, is_active, remaining_quantity) \
         VALUES ($1, $2, 'USD', $3, $4) RETURNING id",
    )
    .bind(name)
    .bind(price)
    .bind(is_active)
    .bind(quantity)
    .fetch_one(db.pool())
    .await
    .expect("Error seeding ticket type")
}

/// Gateway returning a fixed verdict per settlement kind.
#[derive(Debug, Clone)]
pub struct FixedGateway {
    pub payment_outcome: SettlementOutcome,
    pub refund_outcome: SettlementOutcome,
}

impl FixedGateway {
    pub fn approving() -> Self {
        Self { payment_outcome: SettlementOutcome::approved(), refund_outcome: SettlementOutcome::approved() }
    }

    pub fn declining() -> Self {
        Self { payment_outcome: SettlementOutcome::declined(), refund_outcome: SettlementOutcome::declined() }
    }

    pub fn refunds_declined() -> Self {
        Self { payment_outcome: SettlementOutcome::approved(), refund_outcome: SettlementOutcome::declined() }
    }
}

impl SettlementGateway for FixedGateway {
    async fn settle(&self, request: SettlementRequest) -> Result<SettlementOutcome, GatewayError> {
        let outcome = match request.kind {
            SettlementKind::Payment => self.payment_outcome.clone(),
            SettlementKind::Refund => self.refund_outcome.clone(),
        };
        Ok(outcome)
    }
}

/// Gateway that cannot be reached at all. The flow layer must convert this into a failed settlement.
#[derive(Debug, Clone)]
pub struct UnavailableGateway;

impl SettlementGateway for UnavailableGateway {
    async fn settle(&self, _request: SettlementRequest) -> Result<SettlementOutcome, GatewayError> {
        Err(GatewayError::Unavailable("connection refused".to_string()))
    }
}
