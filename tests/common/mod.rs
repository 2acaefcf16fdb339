#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use orderly_api::{
    app_router,
    config::AppConfig,
    db,
    entities::{category, inventory, product, store, user_role, vendor, AppRole},
    events::{self, ChangeFeed, EventSender},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "k7Qp2vXz9LmN4rT8wYb1Hc6Jd3Fg5Se0";

/// Helper harness for spinning up the full router backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with a freshly migrated database.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // Every in-memory SQLite connection is its own database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let change_feed = ChangeFeed::new();
        let event_task = tokio::spawn(events::process_events(event_rx, change_feed.clone()));

        let state = AppState::new(
            Arc::new(pool),
            cfg,
            EventSender::new(event_tx),
            change_feed,
        );
        let router = app_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Signs a new account up and returns its bearer token.
    pub async fn sign_up(&self, email: &str, password: &str) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/v1/auth/signup",
                Some(json!({
                    "email": email,
                    "password": password,
                    "full_name": "Test Staff"
                })),
                None,
            )
            .await;
        assert_eq!(response.status(), 201, "signup should succeed");
        let body = response_json(response).await;
        body["data"]["access_token"]
            .as_str()
            .expect("access token in signup response")
            .to_string()
    }

    /// Signs an existing account in and returns its bearer token.
    pub async fn sign_in(&self, email: &str, password: &str) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/v1/auth/signin",
                Some(json!({ "email": email, "password": password })),
                None,
            )
            .await;
        assert_eq!(response.status(), 200, "signin should succeed");
        let body = response_json(response).await;
        body["data"]["access_token"]
            .as_str()
            .expect("access token in signin response")
            .to_string()
    }

    /// A store manager token for kitchen and admin calls on `store_id`.
    pub async fn staff_token(&self, store_id: Uuid) -> String {
        let email = format!("staff-{}@example.com", Uuid::new_v4());
        let token = self.sign_up(&email, "secret123").await;
        let user = self
            .state
            .auth
            .authenticate(&token)
            .expect("signup token should authenticate");
        self.grant_role(user.user_id, store_id, AppRole::StoreManager)
            .await;
        // Grants are read at sign-in
        self.sign_in(&email, "secret123").await
    }

    pub async fn seed_store(&self, name: &str) -> store::Model {
        let now = Utc::now();
        let vendor = vendor::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("{name} Group")),
            currency: Set(Some("INR".to_string())),
            currency_symbol: Set(Some("₹".to_string())),
            logo_url: Set(None),
            theme_color: Set(Some("#ff6600".to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed vendor");

        store::ActiveModel {
            id: Set(Uuid::new_v4()),
            vendor_id: Set(vendor.id),
            name: Set(name.to_string()),
            address: Set(None),
            phone: Set(None),
            currency: Set(Some("INR".to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed store")
    }

    pub async fn seed_category(&self, store_id: Uuid, name: &str, order: i32) -> category::Model {
        category::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            name: Set(name.to_string()),
            image_url: Set(None),
            display_order: Set(Some(order)),
            is_active: Set(Some(true)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed category")
    }

    pub async fn seed_product(
        &self,
        store_id: Uuid,
        category_id: Option<Uuid>,
        name: &str,
        price: Decimal,
        tax_percentage: Decimal,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            category_id: Set(category_id),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            image_url: Set(None),
            is_available: Set(Some(true)),
            is_trending: Set(Some(false)),
            is_recommended: Set(Some(false)),
            prep_time_minutes: Set(Some(10)),
            tax_percentage: Set(Some(tax_percentage)),
            tax_type: Set(Some("GST".to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_inventory(
        &self,
        store_id: Uuid,
        product_id: Uuid,
        current_stock: i32,
        threshold: Option<i32>,
    ) -> inventory::Model {
        let now = Utc::now();
        inventory::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            product_id: Set(product_id),
            current_stock: Set(current_stock),
            min_stock_threshold: Set(threshold),
            last_restocked_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed inventory")
    }

    pub async fn grant_role(&self, user_id: Uuid, store_id: Uuid, role: AppRole) {
        user_role::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            store_id: Set(Some(store_id)),
            role: Set(role),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user role");
    }

    /// Places an order through the kiosk endpoint and returns the receipt body.
    pub async fn place_order(&self, store_id: Uuid, body: Value) -> Value {
        let response = self
            .request(
                Method::POST,
                &format!("/api/v1/stores/{store_id}/checkout"),
                Some(body),
                None,
            )
            .await;
        assert_eq!(response.status(), 201, "checkout should succeed");
        response_json(response).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Reads a money field whether it was serialized as a string or a number.
pub fn decimal(value: &Value) -> Decimal {
    use std::str::FromStr;

    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("expected a decimal, got {other}"),
    }
}
