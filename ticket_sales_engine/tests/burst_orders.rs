mod support;

use std::{collections::HashSet, sync::Arc, time::Duration};

use log::*;
use support::{new_api, seed_ticket_type, seed_user, FixedGateway};
use ticket_sales_engine::{
    db_types::{NewOrder, NewOrderItem},
    traits::SalesApiError,
    CatalogManagement,
};
use tokio::runtime::Runtime;
use tse_common::Money;

const NUM_ORDERS: u64 = 20;
const SEATS: i64 = 12;
const RATE: u64 = 100; // orders per second

/// Fires orders at a sold-out show faster than they can be fulfilled. The availability guard must sell exactly
/// `SEATS` seats, never more, and every successful order must get a distinct order number.
#[test]
fn burst_orders() {
    info!("🚀️ Starting order injection test");

    let sys = Runtime::new().unwrap();

    let delay = Duration::from_millis(1000 / RATE);

    sys.block_on(async move {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let tt = seed_ticket_type(&db, "Hot Show", Money::from_whole(80), SEATS, true).await;
        let mut buyers = vec![];
        for i in 0..5 {
            buyers.push(seed_user(&db, &format!("buyer{i}@example.com"), true).await);
        }

        let mut timer = tokio::time::interval(delay);
        let mut sold = 0_i64;
        let mut numbers = HashSet::new();
        info!("🚀️ Injecting {NUM_ORDERS} orders");
        for i in 0..NUM_ORDERS {
            timer.tick().await;
            let buyer = buyers[(i % 5) as usize];
            let new_order = NewOrder::new(buyer, vec![NewOrderItem::new(tt, 1)]);
            match api.create_order(new_order).await {
                Ok(order) => {
                    sold += 1;
                    assert!(numbers.insert(order.order_number.clone()), "Duplicate order number {}", order.order_number);
                },
                Err(SalesApiError::InvalidRequest(_)) => {},
                Err(e) => panic!("Error processing order {i}: {e}"),
            }
        }
        assert_eq!(sold, SEATS, "Exactly the available seats must be sold");
        let tt = db.fetch_ticket_type(tt).await.unwrap().unwrap();
        assert_eq!(tt.remaining_quantity, 0);
    });
    info!("🚀️ test complete");
}

/// Same guarantee under real contention: the orders race each other on separate tasks instead of arriving one
/// at a time. SQLite reports lock contention as a database error, so each task retries those until its order is
/// either accepted or turned away for lack of stock.
#[test]
fn concurrent_orders_never_oversell() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async move {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let tt = seed_ticket_type(&db, "Hot Show", Money::from_whole(80), SEATS, true).await;
        let mut buyers = vec![];
        for i in 0..5 {
            buyers.push(seed_user(&db, &format!("buyer{i}@example.com"), true).await);
        }

        let api = Arc::new(api);
        let mut tasks = vec![];
        for i in 0..NUM_ORDERS {
            let api = Arc::clone(&api);
            let buyer = buyers[(i % 5) as usize];
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let new_order = NewOrder::new(buyer, vec![NewOrderItem::new(tt, 1)]);
                    match api.create_order(new_order).await {
                        Ok(order) => return Some(order.order_number),
                        Err(SalesApiError::InvalidRequest(_)) => return None,
                        Err(SalesApiError::DatabaseError(_)) => {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        },
                        Err(e) => panic!("Error processing order {i}: {e}"),
                    }
                }
                panic!("Order {i} never got past lock contention");
            }));
        }

        let mut numbers = HashSet::new();
        let mut sold = 0_i64;
        for task in tasks {
            if let Some(number) = task.await.unwrap() {
                sold += 1;
                assert!(numbers.insert(number.clone()), "Duplicate order number {number}");
            }
        }
        assert_eq!(sold, SEATS, "Exactly the available seats must be sold");
        let tt = db.fetch_ticket_type(tt).await.unwrap().unwrap();
        assert_eq!(tt.remaining_quantity, 0);
    });
}
