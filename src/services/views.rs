//! Read models shared by the kiosk receipt, kitchen queue and admin screens.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{order, order_item, product};

/// Order line joined with the product's current name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub special_instructions: Option<String>,
}

impl OrderLineView {
    pub fn new(item: order_item::Model, product_name: Option<String>) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.subtotal,
            special_instructions: item.special_instructions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderWithItems {
    #[schema(value_type = Object)]
    pub order: order::Model,
    pub items: Vec<OrderLineView>,
}

/// Loads the lines of every given order in one query, keeping each order's
/// lines in cart order. Checkout stamps lines a microsecond apart; the id
/// tiebreak keeps rows written any other way in a stable order.
pub async fn attach_items<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<OrderWithItems>, DbErr> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let rows = order_item::Entity::find()
        .filter(order_item::Column::OrderId.is_in(ids))
        .find_also_related(product::Entity)
        .order_by_asc(order_item::Column::CreatedAt)
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?;

    let mut by_order: HashMap<Uuid, Vec<OrderLineView>> = HashMap::new();
    for (item, product) in rows {
        by_order
            .entry(item.order_id)
            .or_default()
            .push(OrderLineView::new(item, product.map(|p| p.name)));
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let items = by_order.remove(&order.id).unwrap_or_default();
            OrderWithItems { order, items }
        })
        .collect())
}
