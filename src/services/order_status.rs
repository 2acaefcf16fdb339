use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{order, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Which screen is asking for a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Surface {
    Kitchen,
    Admin,
}

/// Validates if a status transition is allowed from the given surface
pub fn is_valid_transition(surface: Surface, from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    let kitchen_move = matches!((from, to), (Pending, Preparing) | (Preparing, Ready));
    match surface {
        Surface::Kitchen => kitchen_move,
        Surface::Admin => {
            kitchen_move
                || matches!(
                    (from, to),
                    (Ready, Served)
                        | (Served, Delivered)
                        | (Pending, Cancelled)
                        | (Preparing, Cancelled)
                )
        }
    }
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Moves an order to `new_status` if the surface allows it.
    #[instrument(skip(self), fields(store_id = %store_id, order_id = %order_id, new_status = %new_status))]
    pub async fn transition(
        &self,
        store_id: Uuid,
        order_id: Uuid,
        new_status: OrderStatus,
        surface: Surface,
    ) -> Result<order::Model, ServiceError> {
        let current = self.find(store_id, order_id).await?;
        self.transition_from(current, new_status, surface).await
    }

    async fn find(&self, store_id: Uuid, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .filter(order::Column::StoreId.eq(store_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Applies a transition to an order read earlier.
    ///
    /// The write is a compare-and-set on `current.status`; if the row moved
    /// on since it was read the result is `ConcurrentModification` and the
    /// other change stands.
    pub async fn transition_from(
        &self,
        current: order::Model,
        new_status: OrderStatus,
        surface: Surface,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db;
        let order_id = current.id;
        let store_id = current.store_id;

        let old_status = current.status;
        if !is_valid_transition(surface, old_status, new_status) {
            warn!(%old_status, %new_status, %surface, "rejected status transition");
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition from '{}' to '{}'",
                old_status, new_status
            )));
        }

        let now = Utc::now();
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status.to_value()))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::Status.eq(old_status))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            // Gone entirely, or moved on by someone else
            self.find(store_id, order_id).await?;
            warn!(%old_status, "order status changed underneath us");
            metrics::counter!("orderly.order_status.conflicts", 1);
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        info!(%old_status, %new_status, "order status updated");
        metrics::counter!("orderly.order_status.changed", 1, "to" => new_status.to_string());

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                store_id,
                old_status,
                new_status,
            })
            .await
        {
            warn!(error = %e, "failed to publish status change");
        }

        Ok(order::Model {
            status: new_status,
            updated_at: now,
            ..current
        })
    }
}
