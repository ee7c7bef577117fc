use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::collaborators::ShippingAddress;
use crate::lifecycle::{StatusTriplet, Totals};

/// Fulfilment track of an order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Position on the forward path; `None` for the cancellation branch.
    pub fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Processing => Some(1),
            OrderStatus::Shipped => Some(2),
            OrderStatus::Delivered => Some(3),
            OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Payment track of an order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

/// Refund track, present only on cancelled orders that were paid.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "processed")]
    Processed,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl RefundStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RefundStatus::Processed | RefundStatus::Rejected)
    }
}

/// Payment method declared at checkout. No gateway is involved.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "upi")]
    Upi,
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "cod")]
    Cod,
}

impl PaymentMethod {
    /// Cash on delivery is the only method settled outside checkout.
    pub fn captures_at_checkout(self) -> bool {
        !matches!(self, PaymentMethod::Cod)
    }
}

/// The `orders` table: header of the order aggregate.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-facing number shown on tracking pages.
    #[sea_orm(unique)]
    pub order_number: String,

    /// Pre-assigned number the invoice collaborator keys documents by.
    #[sea_orm(unique)]
    pub invoice_number: String,

    pub customer_id: Uuid,

    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub refund_status: Option<RefundStatus>,

    pub payment_method: PaymentMethod,
    /// Masked card metadata; full card numbers are never received.
    pub card_last4: Option<String>,
    pub card_type: Option<String>,

    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,

    /// Frozen JSON copy of the resolved [`ShippingAddress`].
    #[sea_orm(column_type = "Text")]
    pub shipping_address: String,
    pub notes: Option<String>,

    pub expected_delivery_date: NaiveDate,
    pub delivery_delay_message: Option<String>,

    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_requested_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_one = "super::invoice::Entity")]
    Invoice,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn triplet(&self) -> StatusTriplet {
        StatusTriplet {
            status: self.status,
            payment_status: self.payment_status,
            refund_status: self.refund_status,
        }
    }

    pub fn totals(&self) -> Totals {
        Totals {
            subtotal: self.subtotal,
            shipping_cost: self.shipping_cost,
            discount: self.discount,
            total: self.total,
        }
    }

    pub fn shipping_address(&self) -> Result<ShippingAddress, serde_json::Error> {
        serde_json::from_str(&self.shipping_address)
    }
}
