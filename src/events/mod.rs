use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus, RefundStatus};
use crate::metrics;
use crate::notifications::Notifier;

pub mod outbox;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Facts recorded by the order lifecycle. Each one is written to the outbox
/// in the same transaction as the change it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        customer_id: Uuid,
        total: Decimal,
        payment_method: PaymentMethod,
    },
    OrderStatusChanged {
        order_id: Uuid,
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        order_number: String,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },
    RefundStatusChanged {
        order_id: Uuid,
        order_number: String,
        old_status: Option<RefundStatus>,
        new_status: Option<RefundStatus>,
    },
    DeliveryRescheduled {
        order_id: Uuid,
        order_number: String,
        expected_delivery_date: NaiveDate,
        delay_message: Option<String>,
    },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "OrderPlaced",
            Event::OrderStatusChanged { .. } => "OrderStatusChanged",
            Event::PaymentStatusChanged { .. } => "PaymentStatusChanged",
            Event::RefundStatusChanged { .. } => "RefundStatusChanged",
            Event::DeliveryRescheduled { .. } => "DeliveryRescheduled",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderPlaced { order_id, .. }
            | Event::OrderStatusChanged { order_id, .. }
            | Event::PaymentStatusChanged { order_id, .. }
            | Event::RefundStatusChanged { order_id, .. }
            | Event::DeliveryRescheduled { order_id, .. } => *order_id,
        }
    }
}

/// Reacts to one relayed event. Notifier failures are logged and counted;
/// they never travel back to the transition that produced the event.
pub async fn dispatch(event: &Event, notifier: &dyn Notifier) {
    match event {
        Event::OrderStatusChanged {
            order_number,
            new_status,
            ..
        } => match notifier.notify(order_number, *new_status).await {
            Ok(()) => {
                metrics::record_notification("sent");
                info!(order_number = %order_number, status = %new_status, "customer notified");
            }
            Err(e) => {
                metrics::record_notification("failed");
                warn!(
                    order_number = %order_number,
                    status = %new_status,
                    error = %e,
                    "customer notification failed"
                );
            }
        },
        other => debug!(
            event_type = other.event_type(),
            order_id = %other.order_id(),
            "event relayed"
        ),
    }
}

/// Consumes relayed events until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        dispatch(&event, notifier.as_ref()).await;
    }

    info!("Event processing loop stopped");
}
