//! Back-office endpoints for store staff: dashboard, orders, catalog and
//! customers. Mounted behind a session.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{category, customer, order, product, OrderStatus},
    errors::ServiceError,
    services::{
        admin::{Dashboard, OrderFilter, Overview},
        analytics::AnalyticsReport,
        catalog::{CategoryInput, ProductInput, ProductWithCategory},
        views::OrderWithItems,
    },
    tracing::timed,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductSearch {
    /// Case-insensitive match on the product name
    pub search: Option<String>,
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/stores/:store_id/admin/dashboard", get(dashboard))
        .route("/stores/:store_id/admin/overview", get(overview))
        .route("/stores/:store_id/admin/analytics", get(analytics))
        .route("/stores/:store_id/admin/orders", get(list_orders))
        .route("/stores/:store_id/admin/orders/:order_id", get(get_order))
        .route(
            "/stores/:store_id/admin/orders/:order_id/status",
            put(update_order_status),
        )
        .route(
            "/stores/:store_id/admin/categories",
            get(list_categories).post(create_category),
        )
        .route(
            "/stores/:store_id/admin/categories/:category_id",
            put(update_category).delete(delete_category),
        )
        .route(
            "/stores/:store_id/admin/products",
            get(list_products).post(create_product),
        )
        .route(
            "/stores/:store_id/admin/products/:product_id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route(
            "/stores/:store_id/admin/products/:product_id/availability",
            post(toggle_availability),
        )
        .route("/stores/:store_id/admin/customers", get(list_customers))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/dashboard",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    responses(
        (status = 200, description = "Today's counters", body = ApiResponse<Dashboard>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No grant for this store")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn dashboard(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> ApiResult<Dashboard> {
    let dashboard = state.services.admin.dashboard(store_id).await?;
    Ok(Json(ApiResponse::success(dashboard)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/overview",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    responses(
        (status = 200, description = "Totals, low stock and recent orders", body = ApiResponse<Overview>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No grant for this store")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn overview(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> ApiResult<Overview> {
    let overview = timed("admin_overview", state.services.admin.overview(store_id)).await?;
    Ok(Json(ApiResponse::success(overview)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/analytics",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    responses(
        (status = 200, description = "Revenue and top products", body = ApiResponse<AnalyticsReport>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No grant for this store")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn analytics(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> ApiResult<AnalyticsReport> {
    let report = timed("analytics_report", state.services.analytics.report(store_id)).await?;
    Ok(Json(ApiResponse::success(report)))
}

// Orders

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/orders",
    params(("store_id" = Uuid, Path, description = "Store ID"), OrderFilter),
    responses(
        (status = 200, description = "Orders, newest first", body = ApiResponse<Vec<OrderWithItems>>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No grant for this store")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<Vec<OrderWithItems>> {
    let orders = state.services.admin.list_orders(store_id, &filter).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/orders/{order_id}",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path((store_id, order_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<OrderWithItems> {
    let order = state.services.admin.get_order(store_id, order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/stores/{store_id}/admin/orders/{order_id}/status",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path((store_id, order_id)): Path<(Uuid, Uuid)>,
    auth_user: AuthUser,
    Json(request): Json<StatusUpdateRequest>,
) -> ApiResult<order::Model> {
    let order = state
        .services
        .admin
        .update_order_status(store_id, order_id, request.status)
        .await?;
    info!(user_id = %auth_user.user_id, %order_id, status = %order.status, "order status updated by staff");
    Ok(Json(ApiResponse::success(order)))
}

// Categories

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/categories",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    responses((status = 200, description = "All categories of the store")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_categories(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> ApiResult<Vec<category::Model>> {
    let categories = state.services.catalog.list_categories(store_id).await?;
    Ok(Json(ApiResponse::success(categories)))
}

#[utoipa::path(
    post,
    path = "/api/v1/stores/{store_id}/admin/categories",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    request_body = CategoryInput,
    responses(
        (status = 201, description = "Category created"),
        (status = 400, description = "Invalid category", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_category(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(input): Json<CategoryInput>,
) -> Result<(StatusCode, Json<ApiResponse<category::Model>>), ServiceError> {
    let created = state
        .services
        .catalog
        .create_category(store_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    put,
    path = "/api/v1/stores/{store_id}/admin/categories/{category_id}",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("category_id" = Uuid, Path, description = "Category ID")
    ),
    request_body = CategoryInput,
    responses(
        (status = 200, description = "Category updated"),
        (status = 404, description = "Category not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_category(
    State(state): State<AppState>,
    Path((store_id, category_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<CategoryInput>,
) -> ApiResult<category::Model> {
    let updated = state
        .services
        .catalog
        .update_category(store_id, category_id, input)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

/// Deletes a category; its products stay on the menu without one
#[utoipa::path(
    delete,
    path = "/api/v1/stores/{store_id}/admin/categories/{category_id}",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("category_id" = Uuid, Path, description = "Category ID")
    ),
    responses(
        (status = 204, description = "Category deleted"),
        (status = 404, description = "Category not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_category(
    State(state): State<AppState>,
    Path((store_id, category_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .catalog
        .delete_category(store_id, category_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// Products

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/products",
    params(("store_id" = Uuid, Path, description = "Store ID"), ProductSearch),
    responses(
        (status = 200, description = "Products with their category names", body = ApiResponse<Vec<ProductWithCategory>>)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Query(query): Query<ProductSearch>,
) -> ApiResult<Vec<ProductWithCategory>> {
    let products = state
        .services
        .catalog
        .list_products(store_id, query.search.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(products)))
}

#[utoipa::path(
    post,
    path = "/api/v1/stores/{store_id}/admin/products",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    request_body = ProductInput,
    responses(
        (status = 201, description = "Product created"),
        (status = 400, description = "Invalid product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_product(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(input): Json<ProductInput>,
) -> Result<(StatusCode, Json<ApiResponse<product::Model>>), ServiceError> {
    let created = state.services.catalog.create_product(store_id, input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/products/{product_id}",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Product"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path((store_id, product_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<product::Model> {
    let product = state
        .services
        .catalog
        .get_product(store_id, product_id)
        .await?;
    Ok(Json(ApiResponse::success(product)))
}

#[utoipa::path(
    put,
    path = "/api/v1/stores/{store_id}/admin/products/{product_id}",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    request_body = ProductInput,
    responses(
        (status = 200, description = "Product updated"),
        (status = 400, description = "Invalid product", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path((store_id, product_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<ProductInput>,
) -> ApiResult<product::Model> {
    let updated = state
        .services
        .catalog
        .update_product(store_id, product_id, input)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/stores/{store_id}/admin/products/{product_id}",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Product appears on existing orders", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    Path((store_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .catalog
        .delete_product(store_id, product_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Flips whether the product shows on the kiosk
#[utoipa::path(
    post,
    path = "/api/v1/stores/{store_id}/admin/products/{product_id}/availability",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Availability toggled"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn toggle_availability(
    State(state): State<AppState>,
    Path((store_id, product_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<product::Model> {
    let product = state
        .services
        .catalog
        .toggle_availability(store_id, product_id)
        .await?;
    Ok(Json(ApiResponse::success(product)))
}

// Customers

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/admin/customers",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    responses((status = 200, description = "Loyalty customers, most points first")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_customers(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> ApiResult<Vec<customer::Model>> {
    let customers = state.services.customers.list(store_id).await?;
    Ok(Json(ApiResponse::success(customers)))
}
