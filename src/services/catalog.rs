use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{category, order_item, product, store, vendor},
    errors::ServiceError,
    events::{Event, EventSender},
    services::validation::{money_amount, not_blank, percentage},
};

const DEFAULT_PREP_TIME_MINUTES: i32 = 15;

fn product_in_use() -> ServiceError {
    ServiceError::Conflict(
        "product appears on existing orders; mark it unavailable instead".to_string(),
    )
}
const DEFAULT_TAX_TYPE: &str = "exclusive";

fn default_true() -> bool {
    true
}

fn default_prep_time() -> i32 {
    DEFAULT_PREP_TIME_MINUTES
}

fn default_tax_type() -> String {
    DEFAULT_TAX_TYPE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CategoryInput {
    #[validate(custom = "not_blank", length(min = 1, max = 100))]
    pub name: String,
    pub image_url: Option<String>,
    pub display_order: Option<i32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ProductInput {
    pub category_id: Option<Uuid>,
    #[validate(custom = "not_blank", length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(custom = "money_amount")]
    pub price: Decimal,
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub is_trending: bool,
    #[serde(default)]
    pub is_recommended: bool,
    #[serde(default = "default_prep_time")]
    #[validate(range(min = 0, max = 600))]
    pub prep_time_minutes: i32,
    #[serde(default)]
    #[validate(custom = "percentage")]
    pub tax_percentage: Decimal,
    #[serde(default = "default_tax_type")]
    pub tax_type: String,
}

/// Store name and currency shown at the top of the kiosk
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoreHeader {
    pub id: Uuid,
    pub name: String,
    pub currency_symbol: String,
    pub logo_url: Option<String>,
    pub theme_color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Menu {
    pub store: StoreHeader,
    #[schema(value_type = Vec<Object>)]
    pub categories: Vec<category::Model>,
    #[schema(value_type = Vec<Object>)]
    pub products: Vec<product::Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductWithCategory {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub product: product::Model,
    pub category_name: Option<String>,
}

/// Categories by display order (unordered ones last), then name
fn sort_categories(categories: &mut [category::Model]) {
    categories.sort_by(|a, b| {
        (a.display_order.is_none(), a.display_order, &a.name).cmp(&(
            b.display_order.is_none(),
            b.display_order,
            &b.name,
        ))
    });
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Menu reads for the kiosk and catalog CRUD for the admin
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    default_currency_symbol: String,
}

impl CatalogService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        default_currency_symbol: impl Into<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_currency_symbol: default_currency_symbol.into(),
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to publish catalog change");
        }
    }

    /// The store kiosks open by default: the oldest one
    #[instrument(skip(self))]
    pub async fn default_store(&self) -> Result<store::Model, ServiceError> {
        store::Entity::find()
            .order_by_asc(store::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No store configured".to_string()))
    }

    #[instrument(skip(self))]
    pub async fn store_header(&self, store_id: Uuid) -> Result<StoreHeader, ServiceError> {
        let (store, vendor) = store::Entity::find_by_id(store_id)
            .find_also_related(vendor::Entity)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Store {} not found", store_id)))?;

        let currency_symbol = vendor
            .as_ref()
            .and_then(|v| v.currency_symbol.clone())
            .unwrap_or_else(|| self.default_currency_symbol.clone());

        Ok(StoreHeader {
            id: store.id,
            name: store.name,
            currency_symbol,
            logo_url: vendor.as_ref().and_then(|v| v.logo_url.clone()),
            theme_color: vendor.and_then(|v| v.theme_color),
        })
    }

    #[instrument(skip(self))]
    pub async fn menu(&self, store_id: Uuid) -> Result<Menu, ServiceError> {
        let store = self.store_header(store_id).await?;
        let categories = self.active_categories(store_id).await?;
        let products = self.available_products(store_id, None).await?;
        Ok(Menu {
            store,
            categories,
            products,
        })
    }

    // Categories

    #[instrument(skip(self))]
    pub async fn active_categories(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<category::Model>, ServiceError> {
        let mut categories = category::Entity::find()
            .filter(category::Column::StoreId.eq(store_id))
            .filter(
                Condition::any()
                    .add(category::Column::IsActive.eq(true))
                    .add(category::Column::IsActive.is_null()),
            )
            .all(&*self.db)
            .await?;
        sort_categories(&mut categories);
        Ok(categories)
    }

    #[instrument(skip(self))]
    pub async fn list_categories(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<category::Model>, ServiceError> {
        let mut categories = category::Entity::find()
            .filter(category::Column::StoreId.eq(store_id))
            .all(&*self.db)
            .await?;
        sort_categories(&mut categories);
        Ok(categories)
    }

    async fn find_category(
        &self,
        store_id: Uuid,
        category_id: Uuid,
    ) -> Result<category::Model, ServiceError> {
        category::Entity::find_by_id(category_id)
            .filter(category::Column::StoreId.eq(store_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {} not found", category_id)))
    }

    #[instrument(skip(self, input), fields(store_id = %store_id))]
    pub async fn create_category(
        &self,
        store_id: Uuid,
        input: CategoryInput,
    ) -> Result<category::Model, ServiceError> {
        input.validate()?;
        let created = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            name: Set(input.name.trim().to_string()),
            image_url: Set(clean(input.image_url)),
            display_order: Set(input.display_order),
            is_active: Set(Some(input.is_active)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(category_id = %created.id, "category created");
        self.publish(Event::CategoryChanged {
            category_id: created.id,
            store_id,
        })
        .await;
        Ok(created)
    }

    #[instrument(skip(self, input), fields(store_id = %store_id, category_id = %category_id))]
    pub async fn update_category(
        &self,
        store_id: Uuid,
        category_id: Uuid,
        input: CategoryInput,
    ) -> Result<category::Model, ServiceError> {
        input.validate()?;
        let mut active = self
            .find_category(store_id, category_id)
            .await?
            .into_active_model();
        active.name = Set(input.name.trim().to_string());
        active.image_url = Set(clean(input.image_url));
        active.display_order = Set(input.display_order);
        active.is_active = Set(Some(input.is_active));
        let updated = active.update(&*self.db).await?;

        self.publish(Event::CategoryChanged {
            category_id,
            store_id,
        })
        .await;
        Ok(updated)
    }

    /// Deletes a category; its products stay on the menu uncategorised.
    #[instrument(skip(self), fields(store_id = %store_id, category_id = %category_id))]
    pub async fn delete_category(&self, store_id: Uuid, category_id: Uuid) -> Result<(), ServiceError> {
        let existing = self.find_category(store_id, category_id).await?;
        product::Entity::update_many()
            .col_expr(product::Column::CategoryId, Expr::value(Option::<Uuid>::None))
            .filter(product::Column::StoreId.eq(store_id))
            .filter(product::Column::CategoryId.eq(category_id))
            .exec(&*self.db)
            .await?;
        existing.delete(&*self.db).await?;

        info!("category deleted");
        self.publish(Event::CategoryChanged {
            category_id,
            store_id,
        })
        .await;
        Ok(())
    }

    // Products

    /// Products the kiosk may sell, by name
    #[instrument(skip(self))]
    pub async fn available_products(
        &self,
        store_id: Uuid,
        category_id: Option<Uuid>,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let mut query = product::Entity::find()
            .filter(product::Column::StoreId.eq(store_id))
            .filter(
                Condition::any()
                    .add(product::Column::IsAvailable.eq(true))
                    .add(product::Column::IsAvailable.is_null()),
            );
        if let Some(category_id) = category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }
        Ok(query
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?)
    }

    /// Admin product list with category names and optional name search
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        store_id: Uuid,
        search: Option<&str>,
    ) -> Result<Vec<ProductWithCategory>, ServiceError> {
        let mut query = product::Entity::find().filter(product::Column::StoreId.eq(store_id));
        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            query = query.filter(
                Expr::expr(Func::lower(Expr::col((product::Entity, product::Column::Name))))
                    .like(format!("%{}%", term.to_lowercase())),
            );
        }

        let rows = query
            .find_also_related(category::Entity)
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(product, category)| ProductWithCategory {
                product,
                category_name: category.map(|c| c.name),
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get_product(
        &self,
        store_id: Uuid,
        product_id: Uuid,
    ) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .filter(product::Column::StoreId.eq(store_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    async fn check_category(&self, store_id: Uuid, category_id: Option<Uuid>) -> Result<(), ServiceError> {
        if let Some(category_id) = category_id {
            self.find_category(store_id, category_id)
                .await
                .map_err(|_| {
                    ServiceError::ValidationError(format!(
                        "category {} does not belong to this store",
                        category_id
                    ))
                })?;
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(store_id = %store_id))]
    pub async fn create_product(
        &self,
        store_id: Uuid,
        input: ProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        self.check_category(store_id, input.category_id).await?;

        let now = Utc::now();
        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            category_id: Set(input.category_id),
            name: Set(input.name.trim().to_string()),
            description: Set(clean(input.description)),
            price: Set(input.price),
            image_url: Set(clean(input.image_url)),
            is_available: Set(Some(input.is_available)),
            is_trending: Set(Some(input.is_trending)),
            is_recommended: Set(Some(input.is_recommended)),
            prep_time_minutes: Set(Some(input.prep_time_minutes)),
            tax_percentage: Set(Some(input.tax_percentage)),
            tax_type: Set(Some(input.tax_type)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %created.id, "product created");
        self.publish(Event::ProductChanged {
            product_id: created.id,
            store_id,
        })
        .await;
        Ok(created)
    }

    #[instrument(skip(self, input), fields(store_id = %store_id, product_id = %product_id))]
    pub async fn update_product(
        &self,
        store_id: Uuid,
        product_id: Uuid,
        input: ProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        self.check_category(store_id, input.category_id).await?;

        let mut active = self.get_product(store_id, product_id).await?.into_active_model();
        active.category_id = Set(input.category_id);
        active.name = Set(input.name.trim().to_string());
        active.description = Set(clean(input.description));
        active.price = Set(input.price);
        active.image_url = Set(clean(input.image_url));
        active.is_available = Set(Some(input.is_available));
        active.is_trending = Set(Some(input.is_trending));
        active.is_recommended = Set(Some(input.is_recommended));
        active.prep_time_minutes = Set(Some(input.prep_time_minutes));
        active.tax_percentage = Set(Some(input.tax_percentage));
        active.tax_type = Set(Some(input.tax_type));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.publish(Event::ProductChanged {
            product_id,
            store_id,
        })
        .await;
        Ok(updated)
    }

    /// Flips a product between available and sold out
    #[instrument(skip(self), fields(store_id = %store_id, product_id = %product_id))]
    pub async fn toggle_availability(
        &self,
        store_id: Uuid,
        product_id: Uuid,
    ) -> Result<product::Model, ServiceError> {
        let current = self.get_product(store_id, product_id).await?;
        let available = !current.available();
        let mut active = current.into_active_model();
        active.is_available = Set(Some(available));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(available, "product availability toggled");
        self.publish(Event::ProductChanged {
            product_id,
            store_id,
        })
        .await;
        Ok(updated)
    }

    /// Removes a product that has never been ordered. Ordered products stay
    /// referenced by their order lines and can only be hidden.
    #[instrument(skip(self), fields(store_id = %store_id, product_id = %product_id))]
    pub async fn delete_product(&self, store_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_product(store_id, product_id).await?;

        let ordered = order_item::Entity::find()
            .filter(order_item::Column::ProductId.eq(product_id))
            .count(&*self.db)
            .await?;
        if ordered > 0 {
            warn!(order_lines = ordered, "refusing to delete an ordered product");
            return Err(product_in_use());
        }

        if let Err(err) = existing.delete(&*self.db).await {
            return Err(match err.sql_err() {
                // An order landed between the check and the delete
                Some(SqlErr::ForeignKeyConstraintViolation(_)) => product_in_use(),
                _ => err.into(),
            });
        }

        info!("product deleted");
        self.publish(Event::ProductChanged {
            product_id,
            store_id,
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, display_order: Option<i32>) -> category::Model {
        category::Model {
            id: Uuid::new_v4(),
            store_id: Uuid::nil(),
            name: name.to_string(),
            image_url: None,
            display_order,
            is_active: Some(true),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn categories_sort_by_display_order_then_name_with_unordered_last() {
        let mut categories = vec![
            category("Drinks", None),
            category("Mains", Some(2)),
            category("Breakfast", Some(1)),
            category("Desserts", None),
            category("Curries", Some(2)),
        ];
        sort_categories(&mut categories);
        let names: Vec<_> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Breakfast", "Curries", "Mains", "Desserts", "Drinks"]);
    }

    #[test]
    fn product_input_defaults() {
        let input: ProductInput =
            serde_json::from_value(serde_json::json!({"name": "Vada", "price": "30"})).unwrap();
        assert!(input.is_available);
        assert!(!input.is_trending);
        assert!(!input.is_recommended);
        assert_eq!(input.prep_time_minutes, 15);
        assert_eq!(input.tax_percentage, Decimal::ZERO);
        assert_eq!(input.tax_type, "exclusive");
        assert!(input.validate().is_ok());
    }

    #[test]
    fn product_input_rejects_out_of_range_values() {
        let mut input: ProductInput =
            serde_json::from_value(serde_json::json!({"name": "Vada", "price": "30"})).unwrap();
        input.tax_percentage = Decimal::new(101, 0);
        assert!(input.validate().is_err());

        input.tax_percentage = Decimal::ZERO;
        input.name = "x".repeat(101);
        assert!(input.validate().is_err());

        input.name = "  ".into();
        assert!(input.validate().is_err());
    }
}
