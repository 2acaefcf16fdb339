use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, Set, SqlErr, TransactionTrait, TryIntoModel,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        order, order_item, payment, product, store, OrderStatus, OrderType, PaymentMethod,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        customers::{self, LoyaltyCredit, VisitContact},
        totals::{compute_totals, OrderTotals, PricedLine},
        validation::{money_amount, not_blank},
        views::{OrderLineView, OrderWithItems},
    },
};

const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// `ORD-` plus the last eight digits of the epoch-millisecond clock
pub fn generate_order_number(epoch_millis: i64) -> String {
    format!("ORD-{:08}", epoch_millis.rem_euclid(100_000_000))
}

/// Supplies candidate order numbers. Checkout asks again after a collision.
pub trait OrderNumberSource: Send + Sync {
    fn next_number(&self) -> String;
}

/// Numbers taken from the wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockOrderNumbers;

impl OrderNumberSource for ClockOrderNumbers {
    fn next_number(&self) -> String {
        generate_order_number(Utc::now().timestamp_millis())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CartLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct QuoteRequest {
    #[validate(length(min = 1, message = "cart is empty"))]
    pub items: Vec<CartLineInput>,
    #[serde(default)]
    #[validate(custom = "money_amount")]
    pub tip: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotedLine {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub line_tax: Decimal,
}

impl TryFrom<&PricedLine> for QuotedLine {
    type Error = ServiceError;

    fn try_from(line: &PricedLine) -> Result<Self, Self::Error> {
        Ok(Self {
            product_id: line.product_id,
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total()?,
            line_tax: line.line_tax()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Quote {
    pub lines: Vec<QuotedLine>,
    pub totals: OrderTotals,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "cart is empty"))]
    pub items: Vec<CartLineInput>,
    pub order_type: OrderType,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    #[validate(custom = "money_amount")]
    pub tip: Decimal,
    #[validate(custom = "not_blank", length(max = 100))]
    pub customer_name: String,
    #[validate(length(max = 20))]
    pub customer_phone: Option<String>,
    #[validate(email)]
    pub customer_email: Option<String>,
    pub kiosk_id: Option<String>,
    pub table_id: Option<Uuid>,
}

impl CheckoutRequest {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for line in &self.items {
            line.validate()?;
        }
        Ok(())
    }

    fn phone(&self) -> Option<&str> {
        self.customer_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// What the kiosk shows and prints after a successful checkout
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Receipt {
    #[serde(flatten)]
    pub order: OrderWithItems,
    #[schema(value_type = Object)]
    pub payment: payment::Model,
    pub totals: OrderTotals,
    pub loyalty: Option<LoyaltyCredit>,
}

/// Turns a cart into a paid order
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    order_numbers: Arc<dyn OrderNumberSource>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self {
            db,
            event_sender,
            order_numbers: Arc::new(ClockOrderNumbers),
        }
    }

    pub fn with_order_numbers(mut self, source: Arc<dyn OrderNumberSource>) -> Self {
        self.order_numbers = source;
        self
    }

    /// Prices cart lines against the store's current catalog
    #[instrument(skip(self, lines), fields(store_id = %store_id, lines = lines.len()))]
    pub async fn price_lines(
        &self,
        store_id: Uuid,
        lines: &[CartLineInput],
    ) -> Result<Vec<PricedLine>, ServiceError> {
        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::StoreId.eq(store_id))
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        lines
            .iter()
            .map(|line| {
                let product = products.get(&line.product_id).ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "product {} is not on this store's menu",
                        line.product_id
                    ))
                })?;
                if !product.available() {
                    return Err(ServiceError::ValidationError(format!(
                        "{} is currently unavailable",
                        product.name
                    )));
                }
                Ok(PricedLine::from_product(product, line.quantity))
            })
            .collect()
    }

    /// Prices a cart without placing it
    #[instrument(skip(self, request), fields(store_id = %store_id))]
    pub async fn quote(&self, store_id: Uuid, request: &QuoteRequest) -> Result<Quote, ServiceError> {
        request.validate()?;
        for line in &request.items {
            line.validate()?;
        }
        let priced = self.price_lines(store_id, &request.items).await?;
        let totals = compute_totals(&priced, request.tip)?;
        let lines = priced
            .iter()
            .map(QuotedLine::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Quote { lines, totals })
    }

    /// Places an order: order, items, payment and loyalty commit together or
    /// not at all.
    #[instrument(skip(self, request), fields(store_id = %store_id, items = request.items.len()))]
    pub async fn checkout(
        &self,
        store_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<Receipt, ServiceError> {
        let started = Instant::now();
        request.validate_all()?;

        store::Entity::find_by_id(store_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Store {} not found", store_id)))?;

        let priced = self.price_lines(store_id, &request.items).await?;
        let totals = compute_totals(&priced, request.tip)?;

        let txn = self.db.begin().await?;
        let mut placed = self.insert_order(&txn, store_id, &request, &totals).await?;
        let items = insert_items(&txn, placed.id, &request.items, &priced).await?;
        let payment = insert_payment(&txn, placed.id, request.payment_method, totals.total_amount).await?;

        let loyalty = match request.phone() {
            Some(phone) => {
                let credit = customers::record_visit(
                    &txn,
                    store_id,
                    VisitContact {
                        phone,
                        name: Some(request.customer_name.trim()),
                        email: request.customer_email.as_deref(),
                    },
                    totals.total_amount,
                )
                .await?;
                order::Entity::update_many()
                    .col_expr(order::Column::CustomerId, Expr::value(credit.customer_id))
                    .filter(order::Column::Id.eq(placed.id))
                    .exec(&txn)
                    .await?;
                placed.customer_id = Some(credit.customer_id);
                Some(credit)
            }
            None => None,
        };

        txn.commit().await?;

        info!(
            order_id = %placed.id,
            order_number = %placed.order_number,
            total = %totals.total_amount,
            "order placed"
        );
        metrics::counter!("orderly.orders.placed", 1);
        metrics::histogram!("orderly.checkout.duration", started.elapsed());

        if let Err(e) = self
            .event_sender
            .send(Event::OrderPlaced {
                order_id: placed.id,
                store_id,
                order_number: placed.order_number.clone(),
            })
            .await
        {
            warn!(error = %e, "failed to publish order placed");
        }

        Ok(Receipt {
            order: OrderWithItems {
                order: placed,
                items,
            },
            payment,
            totals,
            loyalty,
        })
    }

    /// Inserts the order row, retrying with a fresh number on collision.
    async fn insert_order(
        &self,
        txn: &DatabaseTransaction,
        store_id: Uuid,
        request: &CheckoutRequest,
        totals: &OrderTotals,
    ) -> Result<order::Model, ServiceError> {
        for attempt in 1..=ORDER_NUMBER_ATTEMPTS {
            let now = Utc::now();
            let model = order::ActiveModel {
                id: Set(Uuid::new_v4()),
                store_id: Set(store_id),
                customer_id: Set(None),
                customer_name: Set(Some(request.customer_name.trim().to_string())),
                table_id: Set(request.table_id),
                kiosk_id: Set(request.kiosk_id.clone()),
                order_number: Set(self.order_numbers.next_number()),
                order_type: Set(request.order_type),
                status: Set(OrderStatus::Pending),
                subtotal_amount: Set(Some(totals.subtotal)),
                tax_amount: Set(Some(totals.tax_amount)),
                tip_amount: Set(Some(totals.tip_amount)),
                discount_amount: Set(Some(Decimal::ZERO)),
                total_amount: Set(totals.total_amount),
                created_at: Set(now),
                updated_at: Set(now),
            };

            let savepoint = txn.begin().await?;
            match order::Entity::insert(model.clone()).exec(&savepoint).await {
                Ok(_) => {
                    savepoint.commit().await?;
                    return Ok(model.try_into_model()?);
                }
                Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    savepoint.rollback().await?;
                    warn!(attempt, "order number collision, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ServiceError::Conflict(
            "could not allocate a unique order number".to_string(),
        ))
    }
}

async fn insert_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    inputs: &[CartLineInput],
    priced: &[PricedLine],
) -> Result<Vec<OrderLineView>, ServiceError> {
    let now = Utc::now();
    let models: Vec<order_item::ActiveModel> = inputs
        .iter()
        .zip(priced)
        .enumerate()
        .map(|(position, (input, line))| {
            Ok(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                subtotal: Set(line.line_total()?),
                special_instructions: Set(input
                    .special_instructions
                    .as_ref()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())),
                created_at: Set(now + ChronoDuration::microseconds(position as i64)),
            })
        })
        .collect::<Result<_, ServiceError>>()?;

    order_item::Entity::insert_many(models.clone())
        .exec(conn)
        .await?;

    models
        .into_iter()
        .zip(priced)
        .map(|(model, line)| {
            let item = model.try_into_model()?;
            Ok(OrderLineView::new(item, Some(line.name.clone())))
        })
        .collect()
}

async fn insert_payment<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    method: PaymentMethod,
    amount: Decimal,
) -> Result<payment::Model, ServiceError> {
    // Simulated gateway: always approves
    let model = payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        amount: Set(amount),
        method: Set(method),
        status: Set(Some(payment::PAYMENT_STATUS_COMPLETED.to_string())),
        transaction_id: Set(Some(format!("SIM-{}", Uuid::new_v4()))),
        created_at: Set(Utc::now()),
    };
    payment::Entity::insert(model.clone()).exec(conn).await?;
    Ok(model.try_into_model()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            items: vec![CartLineInput {
                product_id: Uuid::new_v4(),
                quantity: 1,
                special_instructions: None,
            }],
            order_type: OrderType::DineIn,
            payment_method: PaymentMethod::Card,
            tip: Decimal::ZERO,
            customer_name: "Asha".to_string(),
            customer_phone: Some("  ".to_string()),
            customer_email: None,
            kiosk_id: None,
            table_id: None,
        }
    }

    #[test]
    fn order_number_keeps_last_eight_digits() {
        assert_eq!(generate_order_number(1_717_171_717_171), "ORD-71717171");
        assert_eq!(generate_order_number(1_700_000_000_042), "ORD-00000042");
    }

    #[test]
    fn clock_numbers_have_the_receipt_shape() {
        let number = ClockOrderNumbers.next_number();
        assert!(number.starts_with("ORD-"));
        assert_eq!(number.len(), 12);
    }

    #[test]
    fn tip_beyond_money_range_is_rejected() {
        let mut req = request();
        req.tip = Decimal::MAX;
        assert_matches!(req.validate_all(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut req = request();
        req.customer_name = "   ".into();
        assert_matches!(req.validate_all(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn empty_cart_and_bad_quantity_are_rejected() {
        let mut req = request();
        req.items.clear();
        assert_matches!(req.validate_all(), Err(ServiceError::ValidationError(_)));

        let mut req = request();
        req.items[0].quantity = 0;
        assert_matches!(req.validate_all(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn negative_tip_is_rejected() {
        let mut req = request();
        req.tip = Decimal::new(-100, 2);
        assert_matches!(req.validate_all(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn blank_phone_skips_loyalty() {
        assert_eq!(request().phone(), None);
        let mut req = request();
        req.customer_phone = Some(" 9876543210 ".into());
        assert_eq!(req.phone(), Some("9876543210"));
    }
}
