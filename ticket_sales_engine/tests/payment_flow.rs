mod support;

use support::{new_api, seed_ticket_type, seed_user, FixedGateway, UnavailableGateway};
use ticket_sales_engine::{
    db_types::{NewOrder, NewOrderItem, NewPayment, Order, OrderStatus, PaymentMethod, SettlementStatus},
    gateway::{SettlementOutcome, GATEWAY_CODE_APPROVED, GATEWAY_CODE_DECLINED, GATEWAY_CODE_ERROR},
    payment_objects::PaymentUpdate,
    traits::{SalesApiError, SalesDatabase},
    OrderFlowApi,
    SqliteDatabase,
};
use tokio::runtime::Runtime;
use tse_common::Money;

async fn seed_order<G>(db: &SqliteDatabase, api: &OrderFlowApi<SqliteDatabase, G>) -> Order
where G: ticket_sales_engine::gateway::SettlementGateway {
    let alice = seed_user(db, "alice@example.com", true).await;
    let general = seed_ticket_type(db, "General Admission", Money::from_whole(45), 10, true).await;
    let vip = seed_ticket_type(db, "VIP", Money::from_whole(120), 5, true).await;
    // 210.00 + 25.20 tax = 235.20
    api.create_order(NewOrder::new(alice, vec![NewOrderItem::new(general, 2), NewOrderItem::new(vip, 1)]))
        .await
        .expect("Error creating order")
}

#[test]
fn full_payment_marks_order_paid() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;

        let payment =
            api.create_payment(NewPayment::new(order.id, order.total, PaymentMethod::CreditCard)).await.unwrap();
        assert_eq!(payment.status, SettlementStatus::Completed);
        assert!(payment.transaction_id.starts_with("TXN-"));
        assert!(payment.processed_at.is_some());

        let meta = payment.metadata();
        assert_eq!(meta.gateway_code.as_deref(), Some(GATEWAY_CODE_APPROVED));
        // 2.9% of 235.20 is 6.8208, rounded to 6.82
        assert_eq!(meta.processing_fee, Some(Money::from_cents(682)));

        let order = api.fetch_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    });
}

#[test]
fn partial_payments_accumulate() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;
        let half = Money::from_cents(11_760);

        api.create_payment(NewPayment::new(order.id, half, PaymentMethod::PayPal)).await.unwrap();
        let order = api.fetch_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending, "Half-paid order must stay pending");

        api.create_payment(NewPayment::new(order.id, half, PaymentMethod::PayPal)).await.unwrap();
        let order = api.fetch_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        // No further payments once paid
        let err = api.create_payment(NewPayment::new(order.id, half, PaymentMethod::PayPal)).await.unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidTransition(_)));
    });
}

#[test]
fn overpayment_is_rejected() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;

        let too_much = order.total + Money::from_cents(1);
        let err = api.create_payment(NewPayment::new(order.id, too_much, PaymentMethod::CreditCard)).await.unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidRequest(_)), "got {err}");

        // Pay most of it, then try to overshoot the remainder
        api.create_payment(NewPayment::new(order.id, Money::from_cents(23_000), PaymentMethod::CreditCard))
            .await
            .unwrap();
        let err = api
            .create_payment(NewPayment::new(order.id, Money::from_cents(600), PaymentMethod::CreditCard))
            .await
            .unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidRequest(_)));

        let err =
            api.create_payment(NewPayment::new(order.id, Money::from_cents(0), PaymentMethod::CreditCard)).await.unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidRequest(_)));
    });
}

#[test]
fn duplicate_transaction_ids_are_rejected() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;
        let half = Money::from_cents(11_760);

        let payment = NewPayment::new(order.id, half, PaymentMethod::CreditCard).with_transaction_id("TXN-REPLAYED");
        api.create_payment(payment.clone()).await.unwrap();
        let err = api.create_payment(payment).await.unwrap_err();
        assert!(matches!(err, SalesApiError::DuplicateTransactionId(txid) if txid == "TXN-REPLAYED"));
    });
}

#[test]
fn declined_settlement_is_recorded_not_thrown() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::declining()).await;
        let order = seed_order(&db, &api).await;

        let payment =
            api.create_payment(NewPayment::new(order.id, order.total, PaymentMethod::CreditCard)).await.unwrap();
        assert_eq!(payment.status, SettlementStatus::Failed);
        let meta = payment.metadata();
        assert_eq!(meta.gateway_code.as_deref(), Some(GATEWAY_CODE_DECLINED));
        assert_eq!(meta.processing_fee, None, "No fee on a failed payment");

        let order = api.fetch_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        // A failed payment is terminal
        let err = api
            .update_payment(payment.id, PaymentUpdate::default().with_new_status(SettlementStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidTransition(_)));
    });
}

#[test]
fn gateway_outage_fails_the_payment() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(UnavailableGateway).await;
        let order = seed_order(&db, &api).await;

        let payment =
            api.create_payment(NewPayment::new(order.id, order.total, PaymentMethod::CreditCard)).await.unwrap();
        assert_eq!(payment.status, SettlementStatus::Failed);
        let meta = payment.metadata();
        assert_eq!(meta.gateway_code.as_deref(), Some(GATEWAY_CODE_ERROR));
        assert!(meta.error.is_some());
    });
}

#[test]
fn completed_payments_are_frozen() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;
        let payment =
            api.create_payment(NewPayment::new(order.id, order.total, PaymentMethod::CreditCard)).await.unwrap();

        let err = api
            .update_payment(payment.id, PaymentUpdate::default().with_new_status(SettlementStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidTransition(_)));

        let err = api.delete_payment(payment.id).await.unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidTransition(_)));
    });
}

#[test]
fn manual_completion_reconciles_the_order() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;

        // Insert without driving settlement, as an operator importing a bank transfer would
        let payment =
            db.insert_payment(NewPayment::new(order.id, order.total, PaymentMethod::BankTransfer)).await.unwrap();
        assert_eq!(payment.status, SettlementStatus::Pending);

        let payment = api
            .update_payment(payment.id, PaymentUpdate::default().with_new_status(SettlementStatus::Completed))
            .await
            .unwrap();
        assert_eq!(payment.status, SettlementStatus::Completed);
        assert!(payment.processed_at.is_some());
        let order = api.fetch_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    });
}

#[test]
fn competing_settlements_cannot_overpay() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;

        // Two full-amount payments land while the order is still unpaid. Each is valid on its own.
        let first = db.insert_payment(NewPayment::new(order.id, order.total, PaymentMethod::CreditCard)).await.unwrap();
        let second = db.insert_payment(NewPayment::new(order.id, order.total, PaymentMethod::PayPal)).await.unwrap();

        let first = db.record_settlement(first.id, SettlementOutcome::approved()).await.unwrap();
        assert_eq!(first.status, SettlementStatus::Completed);

        // The gateway approved the second too, but honouring it would double-pay the order.
        let second = db.record_settlement(second.id, SettlementOutcome::approved()).await.unwrap();
        assert_eq!(second.status, SettlementStatus::Failed);
        assert!(second.metadata().error.is_some());

        let order = api.fetch_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    });
}

#[test]
fn manual_completion_respects_the_order_total() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;

        let first =
            db.insert_payment(NewPayment::new(order.id, order.total, PaymentMethod::BankTransfer)).await.unwrap();
        let second =
            db.insert_payment(NewPayment::new(order.id, order.total, PaymentMethod::BankTransfer)).await.unwrap();

        api.update_payment(first.id, PaymentUpdate::default().with_new_status(SettlementStatus::Completed))
            .await
            .unwrap();
        let err = api
            .update_payment(second.id, PaymentUpdate::default().with_new_status(SettlementStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidTransition(_)), "got {err}");

        let order = api.fetch_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    });
}

#[test]
fn verify_payment_status_reports_the_stored_verdict() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async {
        let (db, api) = new_api(FixedGateway::approving()).await;
        let order = seed_order(&db, &api).await;
        let payment =
            api.create_payment(NewPayment::new(order.id, order.total, PaymentMethod::CreditCard)).await.unwrap();

        let status = api.verify_payment_status(&payment.transaction_id).await.unwrap();
        assert_eq!(status.transaction_id, payment.transaction_id);
        assert_eq!(status.status, SettlementStatus::Completed);
        assert_eq!(status.amount, payment.amount);
        assert_eq!(status.gateway_response, "SUCCESS");

        let err = api.verify_payment_status("TXN-UNKNOWN").await.unwrap_err();
        assert!(matches!(err, SalesApiError::InvalidRequest(_)));
    });
}
