use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{order, OrderStatus},
    errors::ServiceError,
    events::{ChangeFeed, ChangeTable, Subscription},
    services::{
        order_status::{OrderStatusService, Surface},
        views::{attach_items, OrderWithItems},
    },
};

/// Kitchen display: the live queue of orders to cook
#[derive(Clone)]
pub struct KitchenService {
    db: Arc<DatabaseConnection>,
    status: OrderStatusService,
    feed: ChangeFeed,
}

impl KitchenService {
    pub fn new(db: Arc<DatabaseConnection>, status: OrderStatusService, feed: ChangeFeed) -> Self {
        Self { db, status, feed }
    }

    /// Pending and preparing orders, oldest first
    #[instrument(skip(self))]
    pub async fn queue(&self, store_id: Uuid) -> Result<Vec<OrderWithItems>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::Status.is_in(OrderStatus::KITCHEN_QUEUE))
            .order_by_asc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(attach_items(&*self.db, orders).await?)
    }

    pub async fn start_preparing(
        &self,
        store_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.status
            .transition(store_id, order_id, OrderStatus::Preparing, Surface::Kitchen)
            .await
    }

    pub async fn mark_ready(
        &self,
        store_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.status
            .transition(store_id, order_id, OrderStatus::Ready, Surface::Kitchen)
            .await
    }

    /// Notifications for this store's orders; each one means "reload the queue".
    pub fn subscribe(&self, store_id: Uuid) -> Subscription {
        self.feed.subscribe(store_id, ChangeTable::Orders)
    }
}
