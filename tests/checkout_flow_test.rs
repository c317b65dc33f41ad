//! End-to-end checkout lifecycle tests at the service layer: happy path,
//! decline, validation failures, resume/supersede policy, session-open
//! retries, and the expiry sweep.

mod common;

use checkout_api::entities::order::OrderStatus;
use checkout_api::errors::ServiceError;
use checkout_api::gateway::GatewayError;
use common::{return_params, TestApp};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn happy_path_completes_order_and_clears_cart() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let p1 = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, p1, 2).await;

    let order = services.checkout.start_checkout(user_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(order.total_amount, dec!(20.00));

    let items = services.orders.get_order_items(order.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].unit_price, dec!(10.00));

    // Added after the snapshot; must survive finalize untouched.
    let p2 = app.seed_product("Canvas Cap", dec!(4.00), 9).await;
    app.add_cart_item(user_id, p2, 1).await;

    let session = services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap();
    let awaiting = services.orders.get_order(order.id).await.unwrap();
    assert_eq!(awaiting.status, OrderStatus::AwaitingPayment);
    assert_eq!(
        awaiting.payment_session_ref.as_deref(),
        Some(session.session_ref.as_str())
    );

    let order_id = order.id.to_string();
    let params = return_params(&[
        ("paymentId", session.session_ref.as_str()),
        ("PayerID", "PAYER-7"),
        ("orderId", order_id.as_str()),
    ]);
    let outcome = services.reconciler.reconcile(None, &params).await.unwrap();
    assert_eq!(outcome.status, OrderStatus::Completed);
    assert!(outcome.reason.is_none());

    let completed = services.orders.get_order(order.id).await.unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(completed.payer_ref.as_deref(), Some("PAYER-7"));
    assert!(completed.gateway_transaction_id.is_some());

    // Only the post-snapshot item remains in the cart.
    let cart = services.cart.read_cart(user_id).await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].product_id, p2);

    // Stock decremented for captured lines only.
    assert_eq!(services.catalog.get_stock(p1).await.unwrap(), 3);
    assert_eq!(services.catalog.get_stock(p2).await.unwrap(), 9);
}

#[tokio::test]
async fn declined_capture_fails_order_and_keeps_cart() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let p1 = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, p1, 2).await;

    let order = services.checkout.start_checkout(user_id).await.unwrap();
    let session = services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap();

    app.gateway.decline_next_capture();

    let order_id = order.id.to_string();
    let params = return_params(&[
        ("paymentId", session.session_ref.as_str()),
        ("PayerID", "PAYER-7"),
        ("orderId", order_id.as_str()),
    ]);
    let outcome = services.reconciler.reconcile(None, &params).await.unwrap();
    assert_eq!(outcome.status, OrderStatus::Failed);
    assert!(outcome.reason.is_some());

    let failed = services.orders.get_order(order.id).await.unwrap();
    assert_eq!(failed.status, OrderStatus::Failed);
    assert!(failed.failure_reason.is_some());

    // Declines leave the cart and stock untouched.
    let cart = services.cart.read_cart(user_id).await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].product_id, p1);
    assert_eq!(services.catalog.get_stock(p1).await.unwrap(), 5);
}

#[tokio::test]
async fn start_checkout_with_empty_cart_fails() {
    let app = TestApp::new().await;

    let err = app
        .state
        .services
        .checkout
        .start_checkout(Uuid::new_v4())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::EmptyCart));
}

#[tokio::test]
async fn start_checkout_rejects_quantities_beyond_stock() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Last One", dec!(25.00), 1).await;
    app.add_cart_item(user_id, product, 3).await;

    let err = app
        .state
        .services
        .checkout
        .start_checkout(user_id)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InsufficientStock(_)));
}

#[tokio::test]
async fn start_checkout_resumes_unexpired_pending_order() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, product, 1).await;

    let first = services.checkout.start_checkout(user_id).await.unwrap();
    let resumed = services.checkout.start_checkout(user_id).await.unwrap();
    assert_eq!(first.id, resumed.id);

    // Still resumed once the session is open.
    services
        .checkout
        .open_payment_session(first.id)
        .await
        .unwrap();
    let resumed = services.checkout.start_checkout(user_id).await.unwrap();
    assert_eq!(first.id, resumed.id);
    assert_eq!(resumed.status, OrderStatus::AwaitingPayment);
}

#[tokio::test]
async fn expired_pending_order_is_superseded_on_restart() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, product, 1).await;

    let stale = services.checkout.start_checkout(user_id).await.unwrap();
    let ttl = app.state.config.checkout.pending_order_ttl_secs as i64;
    app.backdate_order(stale.id, ttl + 60).await;

    let fresh = services.checkout.start_checkout(user_id).await.unwrap();
    assert_ne!(stale.id, fresh.id, "expired orders are never resurrected");

    let old = services.orders.get_order(stale.id).await.unwrap();
    assert_eq!(old.status, OrderStatus::Cancelled);
    assert_eq!(fresh.status, OrderStatus::Created);
}

#[tokio::test]
async fn session_open_failure_leaves_order_created_and_retryable() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, product, 1).await;

    let order = services.checkout.start_checkout(user_id).await.unwrap();

    // Exhaust the retry budget (two attempts in the test config).
    app.gateway
        .queue_create_failure(GatewayError::Unavailable("connect timeout".into()));
    app.gateway
        .queue_create_failure(GatewayError::Unavailable("connect timeout".into()));

    let err = services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GatewayUnavailable(_)));
    assert_eq!(app.gateway.create_calls(), 2);

    // Order identity is preserved for the retry; no session ref was burned.
    let current = services.orders.get_order(order.id).await.unwrap();
    assert_eq!(current.status, OrderStatus::Created);
    assert!(current.payment_session_ref.is_none());

    let session = services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap();
    let current = services.orders.get_order(order.id).await.unwrap();
    assert_eq!(current.status, OrderStatus::AwaitingPayment);
    assert_eq!(
        current.payment_session_ref.as_deref(),
        Some(session.session_ref.as_str())
    );
}

#[tokio::test]
async fn transient_failure_then_success_within_retry_budget() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, product, 1).await;

    let order = services.checkout.start_checkout(user_id).await.unwrap();

    // One failure, then the second attempt inside the same call succeeds.
    app.gateway
        .queue_create_failure(GatewayError::Unavailable("connection reset".into()));

    services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap();
    assert_eq!(app.gateway.create_calls(), 2);
}

#[tokio::test]
async fn rejected_session_is_not_retried() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, product, 1).await;

    let order = services.checkout.start_checkout(user_id).await.unwrap();

    app.gateway
        .queue_create_failure(GatewayError::Rejected("malformed amount".into()));

    let err = services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GatewayRejected(_)));
    assert_eq!(app.gateway.create_calls(), 1);
}

#[tokio::test]
async fn sweep_cancels_abandoned_orders() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, product, 1).await;

    let order = services.checkout.start_checkout(user_id).await.unwrap();
    services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap();

    let ttl = app.state.config.checkout.pending_order_ttl_secs as i64;
    app.backdate_order(order.id, ttl + 60).await;

    let swept = services.checkout.sweep_expired().await.unwrap();
    assert_eq!(swept, 1);

    let cancelled = services.orders.get_order(order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(services
        .orders
        .find_pending(user_id)
        .await
        .unwrap()
        .is_none());

    // Nothing left to sweep.
    assert_eq!(services.checkout.sweep_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_checkout_restarts_with_a_fresh_order() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, product, 1).await;

    let order = services.checkout.start_checkout(user_id).await.unwrap();
    let cancelled = services
        .checkout
        .cancel(order.id, "changed my mind")
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.failure_reason.as_deref(), Some("changed my mind"));

    let fresh = services.checkout.start_checkout(user_id).await.unwrap();
    assert_ne!(order.id, fresh.id);

    // The dead order is history, not resurrected.
    let old = services.orders.get_order(order.id).await.unwrap();
    assert_eq!(old.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn open_session_on_non_created_order_conflicts() {
    let app = TestApp::new().await;
    let services = &app.state.services;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Trail Shirt", dec!(10.00), 5).await;
    app.add_cart_item(user_id, product, 1).await;

    let order = services.checkout.start_checkout(user_id).await.unwrap();
    services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap();

    let err = services
        .checkout
        .open_payment_session(order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    // The gateway was not asked for a second session.
    assert_eq!(app.gateway.create_calls(), 1);
}
