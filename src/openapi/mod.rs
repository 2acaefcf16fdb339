use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Orderly API",
        version = "0.1.0",
        description = r#"
# Orderly Restaurant Ordering API

Self-service kiosk ordering with a live kitchen display and a back office.

## Surfaces

- **Kiosk** (public): store menu, cart quotes and checkout with a simulated payment
- **Kitchen** (session): the pending and preparing queue, start and ready actions, and a Server-Sent Events stream
- **Admin** (session): dashboard, overview, analytics, order management, catalog CRUD and loyalty customers

## Authentication

Sign in through `/api/v1/auth/signin` and send the token on kitchen and admin calls:

```
Authorization: Bearer <your-jwt-token>
```

## Responses

Successful responses are wrapped as `{success, data, message, errors, meta}`.
Errors use `{error, code, message, request_id, timestamp}`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "kiosk", description = "Menu, cart quotes and checkout"),
        (name = "kitchen", description = "Kitchen display"),
        (name = "admin", description = "Back-office management"),
        (name = "auth", description = "Sign up, sign in and sessions"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Kiosk
        crate::handlers::kiosk::default_store,
        crate::handlers::kiosk::get_menu,
        crate::handlers::kiosk::quote_cart,
        crate::handlers::kiosk::checkout,

        // Kitchen
        crate::handlers::kitchen::kitchen_queue,
        crate::handlers::kitchen::start_preparing,
        crate::handlers::kitchen::mark_ready,
        crate::handlers::kitchen::kitchen_stream,

        // Admin
        crate::handlers::admin::dashboard,
        crate::handlers::admin::overview,
        crate::handlers::admin::analytics,
        crate::handlers::admin::list_orders,
        crate::handlers::admin::get_order,
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::list_categories,
        crate::handlers::admin::create_category,
        crate::handlers::admin::update_category,
        crate::handlers::admin::delete_category,
        crate::handlers::admin::list_products,
        crate::handlers::admin::create_product,
        crate::handlers::admin::get_product,
        crate::handlers::admin::update_product,
        crate::handlers::admin::delete_product,
        crate::handlers::admin::toggle_availability,
        crate::handlers::admin::list_customers,

        // Auth
        crate::auth::sign_up_handler,
        crate::auth::sign_in_handler,
        crate::auth::sign_out_handler,
        crate::auth::session_handler,

        // Health
        crate::health_check,
        crate::api_status,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::entities::OrderStatus,
            crate::entities::OrderType,
            crate::entities::PaymentMethod,
            crate::entities::AppRole,
            crate::services::checkout::CartLineInput,
            crate::services::checkout::QuoteRequest,
            crate::services::checkout::Quote,
            crate::services::checkout::QuotedLine,
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::Receipt,
            crate::services::totals::OrderTotals,
            crate::services::customers::LoyaltyCredit,
            crate::services::views::OrderLineView,
            crate::services::views::OrderWithItems,
            crate::services::catalog::StoreHeader,
            crate::services::catalog::Menu,
            crate::services::catalog::CategoryInput,
            crate::services::catalog::ProductInput,
            crate::services::catalog::ProductWithCategory,
            crate::services::admin::Dashboard,
            crate::services::admin::Overview,
            crate::services::admin::LowStockItem,
            crate::services::analytics::AnalyticsReport,
            crate::services::analytics::RevenuePoint,
            crate::services::analytics::TopProduct,
            crate::handlers::admin::StatusUpdateRequest,
            crate::auth::SignUpRequest,
            crate::auth::SignInRequest,
            crate::auth::Session,
            crate::auth::SessionSnapshot,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
