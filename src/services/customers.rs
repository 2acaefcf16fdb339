use std::sync::Arc;

use chrono::Utc;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    sea_query::{Expr, Func, SimpleExpr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entities::customer, errors::ServiceError};

/// One point per ten currency units spent, rounded down
pub fn loyalty_points_for(total: Decimal) -> i32 {
    (total / Decimal::TEN)
        .floor()
        .to_i32()
        .unwrap_or(i32::MAX)
        .max(0)
}

/// Outcome of crediting a visit to a customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LoyaltyCredit {
    pub customer_id: Uuid,
    pub points_earned: i32,
    pub new_customer: bool,
}

/// Identity captured at checkout
#[derive(Debug, Clone)]
pub struct VisitContact<'a> {
    pub phone: &'a str,
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
}

fn coalesce_add(column: customer::Column, amount: i32) -> SimpleExpr {
    SimpleExpr::from(Func::coalesce([
        SimpleExpr::from(Expr::col(column)),
        Expr::val(0).into(),
    ]))
    .add(Expr::val(amount))
}

async fn increment_existing<C: ConnectionTrait>(
    conn: &C,
    customer_id: Uuid,
    points: i32,
) -> Result<(), DbErr> {
    customer::Entity::update_many()
        .col_expr(
            customer::Column::LoyaltyPoints,
            coalesce_add(customer::Column::LoyaltyPoints, points),
        )
        .col_expr(
            customer::Column::TotalOrders,
            coalesce_add(customer::Column::TotalOrders, 1),
        )
        .col_expr(customer::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(customer::Column::Id.eq(customer_id))
        .exec(conn)
        .await?;
    Ok(())
}

async fn find_by_phone_in<C: ConnectionTrait>(
    conn: &C,
    store_id: Uuid,
    phone: &str,
) -> Result<Option<customer::Model>, DbErr> {
    customer::Entity::find()
        .filter(customer::Column::StoreId.eq(store_id))
        .filter(customer::Column::Phone.eq(phone))
        .one(conn)
        .await
}

/// Credits a visit worth `total` to the customer identified by phone,
/// creating the customer on first visit.
///
/// Runs on the caller's connection so it can join the checkout transaction.
#[instrument(skip(conn, contact), fields(store_id = %store_id))]
pub async fn record_visit<C>(
    conn: &C,
    store_id: Uuid,
    contact: VisitContact<'_>,
    total: Decimal,
) -> Result<LoyaltyCredit, ServiceError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let points = loyalty_points_for(total);

    if let Some(existing) = find_by_phone_in(conn, store_id, contact.phone).await? {
        increment_existing(conn, existing.id, points).await?;
        debug!(customer_id = %existing.id, points, "loyalty credited");
        return Ok(LoyaltyCredit {
            customer_id: existing.id,
            points_earned: points,
            new_customer: false,
        });
    }

    create_or_credit(conn, store_id, contact, points).await
}

/// Inserts a first-visit customer holding `points`.
///
/// The insert happens inside a savepoint. If another checkout created the
/// same `(store_id, phone)` customer after our lookup, the unique index
/// rejects the insert and that customer is credited instead.
pub async fn create_or_credit<C>(
    conn: &C,
    store_id: Uuid,
    contact: VisitContact<'_>,
    points: i32,
) -> Result<LoyaltyCredit, ServiceError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let now = Utc::now();
    let customer_id = Uuid::new_v4();
    let model = customer::ActiveModel {
        id: Set(customer_id),
        store_id: Set(store_id),
        phone: Set(contact.phone.to_string()),
        name: Set(contact.name.map(str::to_string)),
        email: Set(contact.email.map(str::to_string)),
        loyalty_points: Set(Some(points)),
        total_orders: Set(Some(1)),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let savepoint = conn.begin().await?;
    match model.insert(&savepoint).await {
        Ok(_) => {
            savepoint.commit().await?;
            info!(customer_id = %customer_id, points, "loyalty customer created");
            Ok(LoyaltyCredit {
                customer_id,
                points_earned: points,
                new_customer: true,
            })
        }
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            savepoint.rollback().await?;
            let existing = find_by_phone_in(conn, store_id, contact.phone)
                .await?
                .ok_or_else(|| ServiceError::Conflict("customer vanished during upsert".into()))?;
            increment_existing(conn, existing.id, points).await?;
            debug!(customer_id = %existing.id, "lost insert race, credited existing customer");
            Ok(LoyaltyCredit {
                customer_id: existing.id,
                points_earned: points,
                new_customer: false,
            })
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DatabaseConnection>,
}

impl CustomerService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn find_by_phone(
        &self,
        store_id: Uuid,
        phone: &str,
    ) -> Result<Option<customer::Model>, ServiceError> {
        Ok(find_by_phone_in(&*self.db, store_id, phone).await?)
    }

    /// Customers of a store, best loyalty first
    #[instrument(skip(self))]
    pub async fn list(&self, store_id: Uuid) -> Result<Vec<customer::Model>, ServiceError> {
        Ok(customer::Entity::find()
            .filter(customer::Column::StoreId.eq(store_id))
            .order_by_desc(customer::Column::LoyaltyPoints)
            .order_by_asc(customer::Column::Phone)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case(dec!(0) => 0 ; "nothing spent")]
    #[test_case(dec!(9.99) => 0 ; "just under ten")]
    #[test_case(dec!(10) => 1 ; "exactly ten")]
    #[test_case(dec!(220) => 22 ; "typical order")]
    #[test_case(dec!(229.99) => 22 ; "rounds down")]
    fn points_for_total(total: Decimal) -> i32 {
        loyalty_points_for(total)
    }
}
