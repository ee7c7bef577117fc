//! Order lifecycle after placement: fulfilment, cancellation, refunds,
//! delivery estimates, invoices and listing.

mod common;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use common::TestApp;
use furnish_orders::{
    entities::order::{OrderStatus, PaymentMethod, PaymentStatus, RefundStatus},
    errors::ServiceError,
    events::{self, Event},
    lifecycle::{ActorRole, Capability, StatusTriplet, Transition},
    notifications::{NotificationError, Notifier},
    services::orders::{DeliveryUpdate, OrderFilter},
};
use std::sync::Mutex;
use uuid::Uuid;

fn admin() -> Capability {
    Capability::staff(Uuid::new_v4(), ActorRole::Admin, true)
}

fn moderator() -> Capability {
    Capability::staff(Uuid::new_v4(), ActorRole::Moderator, false)
}

fn advance(to: OrderStatus) -> Transition {
    Transition::Advance { to }
}

fn refund(to: RefundStatus) -> Transition {
    Transition::Refund { to }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, OrderStatus)>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        order_number: &str,
        status: OrderStatus,
    ) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap()
            .push((order_number.to_string(), status));
        Ok(())
    }
}

// ==================== Fulfilment ====================

#[tokio::test]
async fn staff_moves_an_order_to_delivered_and_customer_is_notified() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Cod).await;
    let orders = &app.state.services.orders;
    let staff = moderator();

    for to in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        let outcome = orders
            .apply_transition(placed.order_id, None, &advance(to), &staff)
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.order.status, to);
    }

    let notifier = RecordingNotifier::default();
    for event in app.relay_outbox().await {
        events::dispatch(&event, &notifier).await;
    }
    let sent = notifier.sent.lock().unwrap();
    assert_eq!(
        *sent,
        vec![
            (placed.order_number.clone(), OrderStatus::Processing),
            (placed.order_number.clone(), OrderStatus::Shipped),
            (placed.order_number.clone(), OrderStatus::Delivered),
        ]
    );
}

#[tokio::test]
async fn forward_jumps_are_allowed_but_not_backward_moves() {
    let app = TestApp::new().await;
    let placed = app.place_order(Uuid::new_v4(), PaymentMethod::Cod).await;
    let orders = &app.state.services.orders;

    orders
        .apply_transition(placed.order_id, None, &advance(OrderStatus::Shipped), &admin())
        .await
        .unwrap();

    let result = orders
        .apply_transition(
            placed.order_id,
            None,
            &advance(OrderStatus::Processing),
            &admin(),
        )
        .await;
    assert_matches!(
        result,
        Err(ServiceError::InvalidTransition { current, .. }) if current.status == OrderStatus::Shipped
    );
}

#[tokio::test]
async fn customers_cannot_advance_orders() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Cod).await;

    let result = app
        .state
        .services
        .orders
        .apply_transition(
            placed.order_id,
            None,
            &advance(OrderStatus::Processing),
            &Capability::customer(customer),
        )
        .await;

    assert_matches!(result, Err(ServiceError::TransitionForbidden { .. }));
    assert_eq!(app.outbox_events(placed.order_id).await.len(), 1);
}

// ==================== Cancellation and refunds ====================

#[tokio::test]
async fn customer_cancels_a_paid_order_and_staff_refunds_it() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Upi).await;
    assert_eq!(placed.payment_status, PaymentStatus::Paid);
    let orders = &app.state.services.orders;

    let cancelled = orders
        .cancel_order(
            placed.order_id,
            "Found a better fit for the room",
            None,
            &Capability::customer(customer),
        )
        .await
        .unwrap();
    assert!(cancelled.applied);
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.order.refund_status, Some(RefundStatus::Pending));
    assert_eq!(
        cancelled.order.cancellation_reason.as_deref(),
        Some("Found a better fit for the room")
    );
    assert!(cancelled.order.cancelled_at.is_some());
    assert!(cancelled.order.refund_requested_at.is_some());

    let staff = moderator();
    orders
        .apply_transition(placed.order_id, None, &refund(RefundStatus::Approved), &staff)
        .await
        .unwrap();
    let processed = orders
        .apply_transition(placed.order_id, None, &refund(RefundStatus::Processed), &staff)
        .await
        .unwrap();

    assert_eq!(
        processed.order.triplet(),
        StatusTriplet {
            status: OrderStatus::Cancelled,
            payment_status: PaymentStatus::Refunded,
            refund_status: Some(RefundStatus::Processed),
        }
    );

    let events = app.outbox_events(placed.order_id).await;
    let refund_moves: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::RefundStatusChanged { new_status, .. } => *new_status,
            _ => None,
        })
        .collect();
    assert_eq!(
        refund_moves,
        vec![
            RefundStatus::Pending,
            RefundStatus::Approved,
            RefundStatus::Processed
        ]
    );
}

#[tokio::test]
async fn cancelling_an_unpaid_order_requests_no_refund() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Cod).await;

    let outcome = app
        .state
        .services
        .orders
        .cancel_order(
            placed.order_id,
            "Ordered twice",
            None,
            &Capability::customer(customer),
        )
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Cancelled);
    assert_eq!(outcome.order.payment_status, PaymentStatus::Pending);
    assert_eq!(outcome.order.refund_status, None);
    assert!(outcome.order.refund_requested_at.is_none());
}

#[tokio::test]
async fn repeated_cancel_is_a_silent_no_op() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Cod).await;
    let orders = &app.state.services.orders;
    let cap = Capability::customer(customer);

    orders
        .cancel_order(placed.order_id, "Changed my mind", None, &cap)
        .await
        .unwrap();
    let events_before = app.outbox_events(placed.order_id).await.len();

    let again = orders
        .cancel_order(placed.order_id, "Changed my mind", None, &cap)
        .await
        .unwrap();

    assert!(!again.applied);
    assert_eq!(again.order.status, OrderStatus::Cancelled);
    assert_eq!(app.outbox_events(placed.order_id).await.len(), events_before);
}

#[tokio::test]
async fn blank_reason_is_rejected() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Cod).await;

    let result = app
        .state
        .services
        .orders
        .cancel_order(placed.order_id, "   ", None, &Capability::customer(customer))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn shipped_orders_need_force_cancel() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Card).await;
    let orders = &app.state.services.orders;

    orders
        .apply_transition(placed.order_id, None, &advance(OrderStatus::Shipped), &admin())
        .await
        .unwrap();

    let by_customer = orders
        .cancel_order(placed.order_id, "Too late?", None, &Capability::customer(customer))
        .await;
    assert_matches!(by_customer, Err(ServiceError::InvalidTransition { .. }));

    let by_moderator = orders
        .cancel_order(placed.order_id, "Damaged in transit", None, &moderator())
        .await;
    assert_matches!(
        by_moderator,
        Err(ServiceError::TransitionForbidden { current, .. }) if current.status == OrderStatus::Shipped
    );

    let forced = orders
        .cancel_order(placed.order_id, "Damaged in transit", None, &admin())
        .await
        .unwrap();
    assert_eq!(forced.order.status, OrderStatus::Cancelled);
    assert_eq!(forced.order.refund_status, Some(RefundStatus::Pending));
}

#[tokio::test]
async fn payment_cannot_jump_straight_to_refunded() {
    let app = TestApp::new().await;
    let placed = app.place_order(Uuid::new_v4(), PaymentMethod::Card).await;

    let result = app
        .state
        .services
        .orders
        .apply_transition(
            placed.order_id,
            None,
            &Transition::Payment {
                to: PaymentStatus::Refunded,
            },
            &admin(),
        )
        .await;

    assert_matches!(result, Err(ServiceError::RefundInvariant { .. }));
}

#[tokio::test]
async fn rejected_refund_keeps_the_payment() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Card).await;
    let orders = &app.state.services.orders;

    orders
        .cancel_order(placed.order_id, "No longer needed", None, &Capability::customer(customer))
        .await
        .unwrap();
    let rejected = orders
        .apply_transition(placed.order_id, None, &refund(RefundStatus::Rejected), &admin())
        .await
        .unwrap();

    assert_eq!(rejected.order.refund_status, Some(RefundStatus::Rejected));
    assert_eq!(rejected.order.payment_status, PaymentStatus::Paid);

    let result = orders
        .apply_transition(placed.order_id, None, &refund(RefundStatus::Processed), &admin())
        .await;
    assert_matches!(result, Err(ServiceError::InvalidTransition { .. }));
}

// ==================== Optimistic concurrency ====================

#[tokio::test]
async fn stale_expected_status_is_refused_with_the_current_state() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Cod).await;
    let orders = &app.state.services.orders;

    orders
        .apply_transition(
            placed.order_id,
            Some(StatusTriplet::PLACED),
            &advance(OrderStatus::Processing),
            &moderator(),
        )
        .await
        .unwrap();

    let result = orders
        .cancel_order(
            placed.order_id,
            "Changed my mind",
            Some(StatusTriplet::PLACED),
            &Capability::customer(customer),
        )
        .await;

    assert_matches!(
        result,
        Err(ServiceError::StaleStatus { current }) if current.status == OrderStatus::Processing
    );
}

// ==================== Visibility ====================

#[tokio::test]
async fn customers_cannot_see_or_touch_other_customers_orders() {
    let app = TestApp::new().await;
    let placed = app.place_order(Uuid::new_v4(), PaymentMethod::Cod).await;
    let stranger = Capability::customer(Uuid::new_v4());
    let services = &app.state.services;

    assert_matches!(
        services.orders.get_order(placed.order_id, &stranger).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        services
            .orders
            .get_order_by_number(&placed.order_number, &stranger)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        services
            .orders
            .cancel_order(placed.order_id, "Not mine", None, &stranger)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        services.invoicing.issue_invoice(placed.order_id, &stranger).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn listing_is_scoped_filtered_and_paginated() {
    let app = TestApp::new().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let first = app.place_order(alice, PaymentMethod::Cod).await;
    app.place_order(alice, PaymentMethod::Cod).await;
    app.place_order(bob, PaymentMethod::Cod).await;
    let orders = &app.state.services.orders;

    orders
        .cancel_order(first.order_id, "Duplicate", None, &Capability::customer(alice))
        .await
        .unwrap();

    // Customers only see their own orders, whatever the filter says.
    let own = orders
        .list_orders(
            OrderFilter {
                customer_id: Some(bob),
                ..Default::default()
            },
            &Capability::customer(alice),
        )
        .await
        .unwrap();
    assert_eq!(own.total, 2);
    assert!(own.orders.iter().all(|o| o.customer_id == alice));

    let cancelled = orders
        .list_orders(
            OrderFilter {
                status: Some(OrderStatus::Cancelled),
                ..Default::default()
            },
            &moderator(),
        )
        .await
        .unwrap();
    assert_eq!(cancelled.total, 1);
    assert_eq!(cancelled.orders[0].id, first.order_id);

    let page = orders
        .list_orders(
            OrderFilter {
                page: 2,
                per_page: 2,
                ..Default::default()
            },
            &moderator(),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.orders.len(), 1);
}

// ==================== Delivery estimates ====================

#[tokio::test]
async fn staff_reschedules_delivery_with_a_message() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Cod).await;
    let orders = &app.state.services.orders;
    let new_date = NaiveDate::from_ymd_opt(2031, 5, 20).unwrap();

    let updated = orders
        .annotate_delivery(
            placed.order_id,
            DeliveryUpdate {
                expected_delivery_date: new_date,
                delay_message: Some("Polish is curing; one more week".to_string()),
            },
            &moderator(),
        )
        .await
        .unwrap();

    assert_eq!(updated.expected_delivery_date, new_date);
    assert_eq!(
        updated.delivery_delay_message.as_deref(),
        Some("Polish is curing; one more week")
    );
    assert_eq!(updated.status, OrderStatus::Pending);

    let cleared = orders
        .annotate_delivery(
            placed.order_id,
            DeliveryUpdate {
                expected_delivery_date: new_date,
                delay_message: Some("  ".to_string()),
            },
            &moderator(),
        )
        .await
        .unwrap();
    assert_eq!(cleared.delivery_delay_message, None);

    let events = app.outbox_events(placed.order_id).await;
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::DeliveryRescheduled { .. }))
            .count(),
        2
    );

    let by_customer = orders
        .annotate_delivery(
            placed.order_id,
            DeliveryUpdate {
                expected_delivery_date: new_date,
                delay_message: None,
            },
            &Capability::customer(customer),
        )
        .await;
    assert_matches!(by_customer, Err(ServiceError::Forbidden(_)));
}

// ==================== Invoices ====================

#[tokio::test]
async fn invoice_is_issued_once() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let placed = app.place_order(customer, PaymentMethod::Card).await;
    let invoicing = &app.state.services.invoicing;

    let first = invoicing
        .issue_invoice(placed.order_id, &Capability::customer(customer))
        .await
        .unwrap();
    let second = invoicing
        .issue_invoice(placed.order_id, &moderator())
        .await
        .unwrap();

    assert_eq!(first.invoice_number, placed.invoice_number);
    assert_eq!(first.document_ref, format!("invoice://{}", placed.invoice_number));
    assert_eq!(first.checksum.len(), 64);
    assert_eq!(first.id, second.id);
    assert_eq!(first.checksum, second.checksum);
}
