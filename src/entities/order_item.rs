use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::CartLine;

/// A frozen copy of one cart line; never edited after placement.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    /// Position in the cart the order was placed from, starting at 1.
    pub line_no: i32,
    pub product_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub category: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// Copies a cart line into an item row of `order_id`.
    pub fn from_cart_line(
        order_id: Uuid,
        line_no: i32,
        line: &CartLine,
        now: DateTime<Utc>,
    ) -> Self {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            line_no: Set(line_no),
            product_id: Set(line.product_id),
            name: Set(line.name.clone()),
            image_url: Set(line.image_url.clone()),
            category: Set(line.category.clone()),
            unit_price: Set(line.unit_price),
            quantity: Set(line.quantity),
            line_total: Set(line.line_total()),
            created_at: Set(now),
        }
    }
}
