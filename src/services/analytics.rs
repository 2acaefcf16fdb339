use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, JoinType, QueryFilter, QuerySelect,
    RelationTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{order, order_item, product},
    errors::ServiceError,
    services::totals::round_money,
};

/// Days covered by the revenue chart, today included
pub const REVENUE_WINDOW_DAYS: i64 = 7;
pub const TOP_PRODUCTS_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RevenuePoint {
    pub day: NaiveDate,
    pub revenue: Decimal,
    pub orders: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TopProduct {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i64,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AnalyticsReport {
    pub total_revenue: Decimal,
    pub total_orders: i64,
    pub average_order_value: Decimal,
    pub revenue_by_day: Vec<RevenuePoint>,
    pub top_products: Vec<TopProduct>,
    pub generated_at: DateTime<Utc>,
}

/// Sum, count and mean of order totals; the mean is zero for no orders
pub fn summarize(totals: &[Decimal]) -> (Decimal, i64, Decimal) {
    let revenue: Decimal = totals.iter().copied().sum();
    let count = totals.len() as i64;
    let average = if count > 0 {
        round_money(revenue / Decimal::from(count))
    } else {
        Decimal::ZERO
    };
    (revenue, count, average)
}

/// First instant of the revenue window ending on `today`
pub fn window_start(today: NaiveDate) -> DateTime<Utc> {
    (today - Duration::days(REVENUE_WINDOW_DAYS - 1))
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

/// Revenue per UTC day for the window ending on `today`, oldest first.
/// Days without orders are present with zero revenue.
pub fn revenue_by_day(orders: &[(DateTime<Utc>, Decimal)], today: NaiveDate) -> Vec<RevenuePoint> {
    let mut points: Vec<RevenuePoint> = (0..REVENUE_WINDOW_DAYS)
        .rev()
        .map(|offset| RevenuePoint {
            day: today - Duration::days(offset),
            revenue: Decimal::ZERO,
            orders: 0,
        })
        .collect();

    let first = points[0].day;
    for (created_at, total) in orders {
        let day = created_at.date_naive();
        if day < first || day > today {
            continue;
        }
        let idx = (day - first).num_days() as usize;
        points[idx].revenue += *total;
        points[idx].orders += 1;
    }
    points
}

/// Best sellers by quantity; ties go to the lower product id.
/// Lines whose product is missing from `products` are left out.
pub fn top_products(
    lines: &[(Uuid, i32)],
    products: &HashMap<Uuid, product::Model>,
    limit: usize,
) -> Vec<TopProduct> {
    let mut quantities: HashMap<Uuid, i64> = HashMap::new();
    for (product_id, quantity) in lines {
        *quantities.entry(*product_id).or_default() += i64::from(*quantity);
    }

    let mut ranked: Vec<TopProduct> = quantities
        .into_iter()
        .filter_map(|(product_id, quantity)| {
            products.get(&product_id).map(|p| TopProduct {
                product_id,
                name: p.name.clone(),
                quantity,
                price: p.price,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.quantity
            .cmp(&a.quantity)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    ranked.truncate(limit);
    ranked
}

#[derive(Clone)]
pub struct AnalyticsService {
    db: Arc<DatabaseConnection>,
}

impl AnalyticsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn report(&self, store_id: Uuid) -> Result<AnalyticsReport, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();
        let today = now.date_naive();

        let totals: Vec<Decimal> = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .all(db)
            .await?
            .into_iter()
            .map(|o| o.total_amount)
            .collect();
        let (total_revenue, total_orders, average_order_value) = summarize(&totals);

        let recent: Vec<(DateTime<Utc>, Decimal)> = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::CreatedAt.gte(window_start(today)))
            .all(db)
            .await?
            .into_iter()
            .map(|o| (o.created_at, o.total_amount))
            .collect();

        let lines: Vec<(Uuid, i32)> = order_item::Entity::find()
            .join(JoinType::InnerJoin, order_item::Relation::Order.def())
            .filter(order::Column::StoreId.eq(store_id))
            .all(db)
            .await?
            .into_iter()
            .map(|item| (item.product_id, item.quantity))
            .collect();

        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::StoreId.eq(store_id))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        debug!(orders = total_orders, lines = lines.len(), "analytics rows loaded");

        Ok(AnalyticsReport {
            total_revenue,
            total_orders,
            average_order_value,
            revenue_by_day: revenue_by_day(&recent, today),
            top_products: top_products(&lines, &products, TOP_PRODUCTS_LIMIT),
            generated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn product(id: Uuid, name: &str, price: Decimal) -> product::Model {
        let now = Utc::now();
        product::Model {
            id,
            store_id: Uuid::nil(),
            category_id: None,
            name: name.to_string(),
            description: None,
            price,
            image_url: None,
            is_available: Some(true),
            is_trending: None,
            is_recommended: None,
            prep_time_minutes: None,
            tax_percentage: None,
            tax_type: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn no_orders_means_zero_average() {
        assert_eq!(summarize(&[]), (Decimal::ZERO, 0, Decimal::ZERO));
    }

    #[test]
    fn average_is_rounded_to_cents() {
        let (revenue, count, avg) = summarize(&[dec!(10), dec!(10), dec!(10.01)]);
        assert_eq!(revenue, dec!(30.01));
        assert_eq!(count, 3);
        assert_eq!(avg, dec!(10.00));
    }

    #[test]
    fn revenue_window_is_seven_days_oldest_first_zero_filled() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let orders = vec![
            (Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap(), dec!(100)),
            (Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 59).unwrap(), dec!(50)),
            (Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(), dec!(20)),
            // outside the window
            (Utc.with_ymd_and_hms(2024, 3, 3, 23, 59, 59).unwrap(), dec!(999)),
        ];
        let points = revenue_by_day(&orders, today);
        assert_eq!(points.len(), 7);
        assert_eq!(points[0].day, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(points[0].revenue, dec!(20));
        assert_eq!(points[6].day, today);
        assert_eq!(points[6].revenue, dec!(150));
        assert_eq!(points[6].orders, 2);
        assert!(points[1..6].iter().all(|p| p.revenue.is_zero() && p.orders == 0));
        assert_eq!(window_start(today), Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap());
    }

    #[test]
    fn top_products_rank_by_quantity_then_id() {
        let ids: Vec<Uuid> = (1..=7u128).map(Uuid::from_u128).collect();
        let products: HashMap<_, _> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, product(*id, &format!("Item {}", i + 1), dec!(10))))
            .collect();
        let lines = vec![
            (ids[0], 1),
            (ids[1], 3),
            (ids[2], 3),
            (ids[3], 2),
            (ids[0], 1),
            (ids[4], 5),
            (ids[5], 1),
            (ids[6], 1),
        ];
        let top = top_products(&lines, &products, TOP_PRODUCTS_LIMIT);
        let order: Vec<Uuid> = top.iter().map(|t| t.product_id).collect();
        assert_eq!(order, vec![ids[4], ids[1], ids[2], ids[0], ids[3]]);
        assert_eq!(top[0].quantity, 5);
        assert_eq!(top[3].quantity, 2);
    }

    proptest! {
        #[test]
        fn window_always_has_seven_ordered_days(
            offsets in proptest::collection::vec((0i64..20, 0i64..10_000), 0..30)
        ) {
            let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
            let noon = today.and_hms_opt(12, 0, 0).unwrap().and_utc();
            let orders: Vec<_> = offsets
                .iter()
                .map(|(days, cents)| (noon - Duration::days(*days), Decimal::new(*cents, 2)))
                .collect();
            let points = revenue_by_day(&orders, today);
            prop_assert_eq!(points.len(), 7);
            prop_assert!(points.windows(2).all(|w| w[0].day < w[1].day));
            let in_window: Decimal = orders
                .iter()
                .filter(|(at, _)| at.date_naive() >= points[0].day)
                .map(|(_, total)| *total)
                .sum();
            let charted: Decimal = points.iter().map(|p| p.revenue).sum();
            prop_assert_eq!(in_window, charted);
        }
    }
}
