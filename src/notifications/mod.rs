use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::time::Duration;
use thiserror::Error;

use crate::entities::order::OrderStatus;

/// Customer-facing message about an order's new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub order_number: String,
    pub status: OrderStatus,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

impl Notification {
    pub fn for_status(order_number: &str, status: OrderStatus) -> Self {
        let message = match status {
            OrderStatus::Pending => format!("We received your order {}.", order_number),
            OrderStatus::Processing => {
                format!("Your order {} is being prepared.", order_number)
            }
            OrderStatus::Shipped => format!("Your order {} is on its way.", order_number),
            OrderStatus::Delivered => format!("Your order {} has been delivered.", order_number),
            OrderStatus::Cancelled => format!("Your order {} was cancelled.", order_number),
        };
        Self {
            order_number: order_number.to_string(),
            status,
            message,
            sent_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Notification endpoint returned {0}")]
    Rejected(u16),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outbound customer messaging. Failures are reported, never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, order_number: &str, status: OrderStatus)
        -> Result<(), NotificationError>;
}

/// Writes notifications to the operator log instead of sending them.
#[derive(Clone)]
pub struct LogNotifier {
    logger: Logger,
}

impl LogNotifier {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        order_number: &str,
        status: OrderStatus,
    ) -> Result<(), NotificationError> {
        let notification = Notification::for_status(order_number, status);
        slog::info!(
            self.logger,
            "customer notification";
            "order_number" => &notification.order_number,
            "status" => %notification.status,
            "message" => &notification.message,
        );
        Ok(())
    }
}

/// POSTs a JSON [`Notification`] to a messaging endpoint.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        order_number: &str,
        status: OrderStatus,
    ) -> Result<(), NotificationError> {
        let notification = Notification::for_status(order_number, status);
        let response = self.client.post(&self.url).json(&notification).send().await?;
        if !response.status().is_success() {
            return Err(NotificationError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}
