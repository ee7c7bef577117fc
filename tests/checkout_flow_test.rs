//! Integration tests for the multi-step checkout.
//!
//! Tests cover:
//! - Placing COD and card orders end to end
//! - Step ordering and session ownership
//! - Address and delivery-date resolution
//! - Keeping the session when order creation fails

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{sample_address, selection, TestApp};
use furnish_orders::{
    collaborators::{CartLine, CartSnapshot},
    entities::order::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::Event,
    lifecycle::Capability,
    services::checkout::CheckoutStep,
};
use rust_decimal_macros::dec;
use sea_orm::ConnectionTrait;
use uuid::Uuid;

// ==================== Placing orders ====================

#[tokio::test]
async fn cod_checkout_places_a_pending_order() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();

    let placed = app.place_order(customer, PaymentMethod::Cod).await;

    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(placed.payment_status, PaymentStatus::Pending);
    assert_eq!(placed.total, dec!(20400));
    assert!(placed.order_number.starts_with("ORD-"));
    assert!(placed.invoice_number.starts_with("INV-"));
    assert_eq!(placed.order_number[4..], placed.invoice_number[4..]);
    // Dining has the slowest lead time in the cart.
    assert_eq!(
        placed.expected_delivery_date,
        Utc::now().date_naive() + Duration::days(12)
    );
    assert!(!app.carts.contains(customer), "cart is cleared after placement");

    let details = app
        .state
        .services
        .orders
        .get_order(placed.order_id, &Capability::customer(customer))
        .await
        .unwrap();
    assert_eq!(details.order.subtotal, dec!(20900));
    assert_eq!(details.order.shipping_cost, dec!(500));
    assert_eq!(details.order.discount, dec!(1000));
    assert_eq!(details.order.refund_status, None);
    assert_eq!(details.order.card_last4, None);
    assert_eq!(details.items.len(), 2);
    assert_eq!(details.items[0].line_no, 1);
    assert_eq!(details.items[0].name, "Sheesham Dining Table");
    assert_eq!(details.items[1].line_total, dec!(900));

    let events = app.outbox_events(placed.order_id).await;
    assert_eq!(events.len(), 1);
    assert_matches!(
        &events[0],
        Event::OrderPlaced { payment_method: PaymentMethod::Cod, total, .. } if *total == dec!(20400)
    );
}

#[tokio::test]
async fn card_checkout_captures_payment_after_placement() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();

    let placed = app.place_order(customer, PaymentMethod::Card).await;

    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(placed.payment_status, PaymentStatus::Paid);

    let order = app
        .state
        .services
        .orders
        .get_order(placed.order_id, &Capability::customer(customer))
        .await
        .unwrap()
        .order;
    assert_eq!(order.card_last4.as_deref(), Some("4242"));
    assert_eq!(order.card_type.as_deref(), Some("visa"));

    let events = app.outbox_events(placed.order_id).await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::PaymentStatusChanged {
            old_status: PaymentStatus::Pending,
            new_status: PaymentStatus::Paid,
            ..
        }
    )));
}

#[tokio::test]
async fn placed_order_keeps_its_address_after_the_book_changes() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    checkout
        .select_address(customer, view.session_id, address_id)
        .await
        .unwrap();
    checkout
        .select_payment(
            customer,
            view.session_id,
            selection(PaymentMethod::Upi),
            Some("  Please call before delivery  ".to_string()),
        )
        .await
        .unwrap();
    let placed = checkout.confirm(customer, view.session_id).await.unwrap();

    app.addresses.remove(address_id);

    let order = app
        .state
        .services
        .orders
        .get_order(placed.order_id, &Capability::customer(customer))
        .await
        .unwrap()
        .order;
    assert_eq!(order.shipping_address().unwrap(), sample_address());
    assert_eq!(order.notes.as_deref(), Some("Please call before delivery"));
}

// ==================== Step ordering ====================

#[tokio::test]
async fn empty_cart_cannot_start_checkout() {
    let app = TestApp::new().await;

    let result = app.state.services.checkout.start(Uuid::new_v4()).await;

    assert_matches!(result, Err(ServiceError::EmptyCart));
}

#[tokio::test]
async fn payment_before_address_is_refused() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    assert_eq!(view.step, CheckoutStep::Address);

    let result = checkout
        .select_payment(customer, view.session_id, selection(PaymentMethod::Cod), None)
        .await;

    assert_matches!(
        result,
        Err(ServiceError::CheckoutStepOutOfOrder {
            expected: CheckoutStep::Address,
            actual: CheckoutStep::Payment
        })
    );
}

#[tokio::test]
async fn confirm_without_payment_points_back_to_payment() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    let view = checkout
        .select_address(customer, view.session_id, address_id)
        .await
        .unwrap();
    assert_eq!(view.step, CheckoutStep::Payment);

    let result = checkout.confirm(customer, view.session_id).await;

    assert_matches!(
        result,
        Err(ServiceError::CheckoutStepOutOfOrder {
            expected: CheckoutStep::Payment,
            actual: CheckoutStep::Review
        })
    );
}

#[tokio::test]
async fn overlong_notes_are_rejected() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    checkout
        .select_address(customer, view.session_id, address_id)
        .await
        .unwrap();
    let result = checkout
        .select_payment(
            customer,
            view.session_id,
            selection(PaymentMethod::Cod),
            Some("x".repeat(501)),
        )
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

// ==================== Sessions and addresses ====================

#[tokio::test]
async fn another_customers_address_is_invalid() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let foreign_address = app.seed_address(Uuid::new_v4());
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    let result = checkout
        .select_address(customer, view.session_id, foreign_address)
        .await;

    assert_matches!(result, Err(ServiceError::InvalidAddress(_)));
}

#[tokio::test]
async fn incomplete_address_is_invalid() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let mut address = sample_address();
    address.postal_code = "?".to_string();
    let address_id = app.addresses.insert(customer, address);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    let result = checkout
        .select_address(customer, view.session_id, address_id)
        .await;

    assert_matches!(result, Err(ServiceError::InvalidAddress(_)));
}

#[tokio::test]
async fn sessions_belong_to_the_customer_who_opened_them() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    let result = checkout.review(Uuid::new_v4(), view.session_id).await;

    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn confirmed_session_cannot_place_a_second_order() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    checkout
        .select_address(customer, view.session_id, address_id)
        .await
        .unwrap();
    checkout
        .select_payment(customer, view.session_id, selection(PaymentMethod::Cod), None)
        .await
        .unwrap();
    checkout.confirm(customer, view.session_id).await.unwrap();

    let again = checkout.confirm(customer, view.session_id).await;
    assert_matches!(again, Err(ServiceError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirms_of_one_session_place_one_order() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    checkout
        .select_address(customer, view.session_id, address_id)
        .await
        .unwrap();
    checkout
        .select_payment(customer, view.session_id, selection(PaymentMethod::Cod), None)
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        checkout.confirm(customer, view.session_id),
        checkout.confirm(customer, view.session_id)
    );
    let placed = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(placed, 1, "one confirm wins: {first:?} / {second:?}");
    assert!([&first, &second]
        .iter()
        .any(|r| matches!(r, Err(ServiceError::NotFound(_)))));

    let orders = app
        .state
        .services
        .orders
        .list_orders(Default::default(), &Capability::customer(customer))
        .await
        .unwrap();
    assert_eq!(orders.total, 1);
}

#[tokio::test]
async fn idle_sessions_expire() {
    let app = TestApp::with_config(|cfg| cfg.checkout_session_ttl_secs = 0).await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    let result = checkout
        .select_address(customer, view.session_id, address_id)
        .await;

    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn unknown_categories_use_the_default_lead_time() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.carts.put(
        customer,
        CartSnapshot {
            lines: vec![CartLine {
                product_id: Uuid::new_v4(),
                name: "Teak Garden Bench".to_string(),
                image_url: None,
                category: "outdoor".to_string(),
                unit_price: dec!(8500),
                quantity: 1,
            }],
            shipping_cost: dec!(0),
            discount: dec!(0),
        },
    );
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    checkout
        .select_address(customer, view.session_id, address_id)
        .await
        .unwrap();
    checkout
        .select_payment(customer, view.session_id, selection(PaymentMethod::Upi), None)
        .await
        .unwrap();

    let review = checkout.review(customer, view.session_id).await.unwrap();
    assert_eq!(review.checkout.step, CheckoutStep::Review);
    assert_eq!(review.checkout.totals.total, dec!(8500));
    assert_eq!(
        review.expected_delivery_date,
        Utc::now().date_naive() + Duration::days(7)
    );
}

#[tokio::test]
async fn slowest_of_several_categories_sets_the_delivery_date() {
    let app = TestApp::with_config(|cfg| {
        cfg.lead_times.insert("bedroom".to_string(), 8);
    })
    .await;
    let customer = Uuid::new_v4();
    let line = |name: &str, category: &str, unit_price| CartLine {
        product_id: Uuid::new_v4(),
        name: name.to_string(),
        image_url: None,
        category: category.to_string(),
        unit_price,
        quantity: 1,
    };
    app.carts.put(
        customer,
        CartSnapshot {
            lines: vec![
                line("Queen Bed Frame", "bedroom", dec!(32000)),
                line("Six-Seater Dining Set", "dining", dec!(41000)),
                line("Teak Garden Bench", "outdoor", dec!(8500)),
            ],
            shipping_cost: dec!(0),
            discount: dec!(0),
        },
    );
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    checkout
        .select_address(customer, view.session_id, address_id)
        .await
        .unwrap();
    checkout
        .select_payment(customer, view.session_id, selection(PaymentMethod::Cod), None)
        .await
        .unwrap();

    // bedroom 8, dining 12, outdoor falls back to the default 7.
    let placed = checkout.confirm(customer, view.session_id).await.unwrap();
    assert_eq!(
        placed.expected_delivery_date,
        Utc::now().date_naive() + Duration::days(12)
    );
}

// ==================== Failure handling ====================

#[tokio::test]
async fn failed_order_creation_keeps_the_session_and_cart() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    app.seed_cart(customer);
    let address_id = app.seed_address(customer);
    let checkout = &app.state.services.checkout;

    let view = checkout.start(customer).await.unwrap();
    checkout
        .select_address(customer, view.session_id, address_id)
        .await
        .unwrap();
    checkout
        .select_payment(customer, view.session_id, selection(PaymentMethod::Cod), None)
        .await
        .unwrap();

    app.db
        .execute_unprepared("DROP TABLE order_items")
        .await
        .unwrap();

    let result = checkout.confirm(customer, view.session_id).await;
    assert_matches!(result, Err(ServiceError::OrderCreationFailed(_)));

    let review = checkout.review(customer, view.session_id).await.unwrap();
    assert!(review.checkout.address.is_some());
    assert!(review.checkout.payment.is_some());
    assert!(app.carts.contains(customer));
}
