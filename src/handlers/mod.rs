pub mod admin;
pub mod kiosk;
pub mod kitchen;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::{ChangeFeed, EventSender},
    services::{
        admin::AdminService, analytics::AnalyticsService, catalog::CatalogService,
        checkout::CheckoutService, customers::CustomerService, kitchen::KitchenService,
        order_status::OrderStatusService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub checkout: Arc<CheckoutService>,
    pub kitchen: Arc<KitchenService>,
    pub admin: Arc<AdminService>,
    pub analytics: Arc<AnalyticsService>,
    pub customers: Arc<CustomerService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        change_feed: ChangeFeed,
        config: &AppConfig,
    ) -> Self {
        let order_status = OrderStatusService::new(db_pool.clone(), event_sender.clone());

        Self {
            catalog: Arc::new(CatalogService::new(
                db_pool.clone(),
                event_sender.clone(),
                config.default_currency_symbol.clone(),
            )),
            checkout: Arc::new(CheckoutService::new(db_pool.clone(), event_sender)),
            kitchen: Arc::new(KitchenService::new(
                db_pool.clone(),
                order_status.clone(),
                change_feed,
            )),
            admin: Arc::new(AdminService::new(
                db_pool.clone(),
                order_status,
                config.low_stock_default_threshold,
            )),
            analytics: Arc::new(AnalyticsService::new(db_pool.clone())),
            customers: Arc::new(CustomerService::new(db_pool)),
        }
    }
}
