use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    entities::{customer, inventory, order, product, OrderStatus},
    errors::ServiceError,
    services::{
        order_status::{OrderStatusService, Surface},
        views::{attach_items, OrderWithItems},
    },
};

const OVERVIEW_LIST_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Dashboard {
    pub today_orders: i64,
    pub today_revenue: Decimal,
    pub active_products: i64,
    pub pending_orders: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LowStockItem {
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub current_stock: i32,
    pub threshold: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Overview {
    pub total_orders: i64,
    pub total_products: i64,
    pub total_customers: i64,
    pub low_stock_count: i64,
    pub low_stock: Vec<LowStockItem>,
    pub recent_orders: Vec<OrderWithItems>,
}

/// Filters for the admin order list
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    /// Matches order number or customer name, case-insensitively
    pub search: Option<String>,
}

/// Most urgent first: lowest stock, then largest shortfall
pub fn low_stock_items(
    rows: Vec<(inventory::Model, Option<product::Model>)>,
    default_threshold: i32,
) -> Vec<LowStockItem> {
    let mut low: Vec<LowStockItem> = rows
        .into_iter()
        .filter(|(inv, _)| inv.is_low(default_threshold))
        .map(|(inv, product)| LowStockItem {
            product_id: inv.product_id,
            product_name: product.map(|p| p.name),
            current_stock: inv.current_stock,
            threshold: inv.threshold(default_threshold),
        })
        .collect();
    low.sort_by(|a, b| {
        a.current_stock
            .cmp(&b.current_stock)
            .then_with(|| (b.threshold - b.current_stock).cmp(&(a.threshold - a.current_stock)))
            .then_with(|| a.product_name.cmp(&b.product_name))
    });
    low
}

#[derive(Clone)]
pub struct AdminService {
    db: Arc<DatabaseConnection>,
    status: OrderStatusService,
    low_stock_default_threshold: i32,
}

impl AdminService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        status: OrderStatusService,
        low_stock_default_threshold: i32,
    ) -> Self {
        Self {
            db,
            status,
            low_stock_default_threshold,
        }
    }

    fn available_products(store_id: Uuid) -> Condition {
        Condition::all()
            .add(product::Column::StoreId.eq(store_id))
            .add(
                Condition::any()
                    .add(product::Column::IsAvailable.eq(true))
                    .add(product::Column::IsAvailable.is_null()),
            )
    }

    #[instrument(skip(self))]
    pub async fn dashboard(&self, store_id: Uuid) -> Result<Dashboard, ServiceError> {
        let db = &*self.db;
        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();

        let today: Vec<Decimal> = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::CreatedAt.gte(today_start))
            .all(db)
            .await?
            .into_iter()
            .map(|o| o.total_amount)
            .collect();

        let active_products = product::Entity::find()
            .filter(Self::available_products(store_id))
            .count(db)
            .await?;

        let pending_orders = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .count(db)
            .await?;

        Ok(Dashboard {
            today_orders: today.len() as i64,
            today_revenue: today.iter().copied().sum(),
            active_products: active_products as i64,
            pending_orders: pending_orders as i64,
        })
    }

    #[instrument(skip(self))]
    pub async fn overview(&self, store_id: Uuid) -> Result<Overview, ServiceError> {
        let db = &*self.db;

        let total_orders = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .count(db)
            .await?;
        let total_products = product::Entity::find()
            .filter(Self::available_products(store_id))
            .count(db)
            .await?;
        let total_customers = customer::Entity::find()
            .filter(customer::Column::StoreId.eq(store_id))
            .count(db)
            .await?;

        let stock = inventory::Entity::find()
            .filter(inventory::Column::StoreId.eq(store_id))
            .find_also_related(product::Entity)
            .all(db)
            .await?;
        let mut low_stock = low_stock_items(stock, self.low_stock_default_threshold);
        let low_stock_count = low_stock.len() as i64;
        low_stock.truncate(OVERVIEW_LIST_LIMIT);

        let recent = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .order_by_desc(order::Column::CreatedAt)
            .limit(OVERVIEW_LIST_LIMIT as u64)
            .all(db)
            .await?;

        Ok(Overview {
            total_orders: total_orders as i64,
            total_products: total_products as i64,
            total_customers: total_customers as i64,
            low_stock_count,
            low_stock,
            recent_orders: attach_items(db, recent).await?,
        })
    }

    /// Newest orders first, optionally filtered
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        store_id: Uuid,
        filter: &OrderFilter,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        let mut query = order::Entity::find().filter(order::Column::StoreId.eq(store_id));

        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", term.to_lowercase());
            query = query.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col((
                            order::Entity,
                            order::Column::OrderNumber,
                        ))))
                        .like(pattern.clone()),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col((
                            order::Entity,
                            order::Column::CustomerName,
                        ))))
                        .like(pattern),
                    ),
            );
        }

        let orders = query
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(attach_items(&*self.db, orders).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        store_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::StoreId.eq(store_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let mut with_items = attach_items(&*self.db, vec![order]).await?;
        with_items
            .pop()
            .ok_or_else(|| ServiceError::InternalError("order vanished while loading items".into()))
    }

    pub async fn update_order_status(
        &self,
        store_id: Uuid,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        self.status
            .transition(store_id, order_id, status, Surface::Admin)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(current: i32, threshold: Option<i32>, name: &str) -> (inventory::Model, Option<product::Model>) {
        let now = Utc::now();
        let product_id = Uuid::new_v4();
        (
            inventory::Model {
                id: Uuid::new_v4(),
                store_id: Uuid::nil(),
                product_id,
                current_stock: current,
                min_stock_threshold: threshold,
                last_restocked_at: None,
                created_at: now,
                updated_at: now,
            },
            Some(product::Model {
                id: product_id,
                store_id: Uuid::nil(),
                category_id: None,
                name: name.to_string(),
                description: None,
                price: Decimal::ONE,
                image_url: None,
                is_available: None,
                is_trending: None,
                is_recommended: None,
                prep_time_minutes: None,
                tax_percentage: None,
                tax_type: None,
                created_at: now,
                updated_at: now,
            }),
        )
    }

    #[test]
    fn low_stock_uses_default_threshold_and_sorts_by_urgency() {
        let rows = vec![
            stock(9, None, "Rice"),
            stock(10, None, "Flour"),
            stock(3, Some(5), "Ghee"),
            stock(3, Some(20), "Milk"),
            stock(0, Some(1), "Saffron"),
            stock(50, Some(100), "Onions"),
        ];
        let low = low_stock_items(rows, 10);
        let names: Vec<_> = low.iter().filter_map(|i| i.product_name.as_deref()).collect();
        assert_eq!(names, ["Saffron", "Milk", "Ghee", "Rice", "Onions"]);
        assert_eq!(low[3].threshold, 10);
    }

    #[test]
    fn zero_threshold_falls_back_to_default() {
        let rows = vec![stock(4, Some(0), "Cardamom"), stock(12, Some(0), "Sugar")];
        let low = low_stock_items(rows, 10);
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].product_name.as_deref(), Some("Cardamom"));
        assert_eq!(low[0].threshold, 10);
    }
}
