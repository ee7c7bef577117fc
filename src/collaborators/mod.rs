//! Contracts for the systems the order lifecycle consumes but does not own.
//!
//! The cart, the catalog and the customer address book live outside this
//! service. Checkout talks to them only through these traits; the in-memory
//! adapters in [`memory`] back the binary and the test suite.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub mod memory;

pub use memory::{InMemoryAddressBook, InMemoryCarts, InMemoryCatalog};

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: &'static str,
        message: String,
    },
    #[error("{collaborator} rejected the request: {message}")]
    Rejected {
        collaborator: &'static str,
        message: String,
    },
}

/// A delivery address as resolved from the customer's address book.
///
/// Orders keep a frozen copy of this record, so later edits or deletion of
/// the source address never reach a placed order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 120, message = "Recipient name is required"))]
    pub full_name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(length(min = 1, max = 200, message = "Address line is required"))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 80, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 80, message = "State is required"))]
    pub state: String,
    #[validate(custom = "validate_postal_code")]
    pub postal_code: String,
    #[validate(length(min = 2, max = 56, message = "Country is required"))]
    pub country: String,
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
    if !allowed || !(7..=15).contains(&digits) {
        return Err(ValidationError::new("invalid_phone"));
    }
    Ok(())
}

fn validate_postal_code(code: &str) -> Result<(), ValidationError> {
    let trimmed = code.trim();
    if trimmed.len() < 3
        || trimmed.len() > 10
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
    {
        return Err(ValidationError::new("invalid_postal_code"));
    }
    Ok(())
}

/// One line of the frozen cart, priced at the moment checkout started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    /// Catalog category; drives the delivery lead time.
    pub category: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Immutable snapshot of a customer's cart handed to checkout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Rejects snapshots whose amounts could not form a consistent order.
    pub fn check_amounts(&self) -> Result<(), String> {
        for line in &self.lines {
            if line.quantity < 1 {
                return Err(format!("quantity for {} must be at least 1", line.name));
            }
            if line.unit_price.is_sign_negative() {
                return Err(format!("unit price for {} cannot be negative", line.name));
            }
        }
        if self.shipping_cost.is_sign_negative() {
            return Err("shipping cost cannot be negative".to_string());
        }
        if self.discount.is_sign_negative() {
            return Err("discount cannot be negative".to_string());
        }
        if self.discount > self.subtotal() + self.shipping_cost {
            return Err("discount exceeds the order value".to_string());
        }
        Ok(())
    }

    /// Distinct categories represented in the cart.
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.lines.iter().map(|l| l.category.as_str()).collect();
        categories.sort_unstable();
        categories.dedup();
        categories
    }
}

/// Shopping cart owned by the storefront.
#[async_trait]
pub trait CartProvider: Send + Sync {
    async fn snapshot(&self, customer_id: Uuid) -> Result<CartSnapshot, CollaboratorError>;

    /// Called only after an order has been placed from the snapshot.
    async fn clear(&self, customer_id: Uuid) -> Result<(), CollaboratorError>;
}

/// Product catalog; only lead times matter to the order lifecycle.
#[async_trait]
pub trait CatalogDirectory: Send + Sync {
    /// Lead time in days for a category, `None` when the catalog has no value.
    async fn lead_time_days(&self, category: &str) -> Result<Option<u32>, CollaboratorError>;
}

/// Customer address book.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Resolves an address owned by `customer_id`; foreign or unknown ids yield `None`.
    async fn resolve(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<ShippingAddress>, CollaboratorError>;
}
