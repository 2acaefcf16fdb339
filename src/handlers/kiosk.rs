//! Public kiosk endpoints: the menu, cart pricing and checkout.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::{
        catalog::{Menu, StoreHeader},
        checkout::{CheckoutRequest, Quote, QuoteRequest, Receipt},
    },
    ApiResponse, ApiResult, AppState,
};

pub fn kiosk_routes() -> Router<AppState> {
    Router::new()
        .route("/stores/default", get(default_store))
        .route("/stores/:store_id/menu", get(get_menu))
        .route("/stores/:store_id/cart/quote", post(quote_cart))
        .route("/stores/:store_id/checkout", post(checkout))
}

/// The store a kiosk opens when none is configured
#[utoipa::path(
    get,
    path = "/api/v1/stores/default",
    responses(
        (status = 200, description = "Default store", body = ApiResponse<StoreHeader>),
        (status = 404, description = "No store configured", body = crate::errors::ErrorResponse)
    ),
    tag = "kiosk"
)]
pub async fn default_store(State(state): State<AppState>) -> ApiResult<StoreHeader> {
    let catalog = &state.services.catalog;
    let store = catalog.default_store().await?;
    let header = catalog.store_header(store.id).await?;
    Ok(Json(ApiResponse::success(header)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/menu",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    responses(
        (status = 200, description = "Store header, active categories and available products", body = ApiResponse<Menu>),
        (status = 404, description = "Store not found", body = crate::errors::ErrorResponse)
    ),
    tag = "kiosk"
)]
pub async fn get_menu(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> ApiResult<Menu> {
    let menu = state.services.catalog.menu(store_id).await?;
    Ok(Json(ApiResponse::success(menu)))
}

/// Prices a cart with current catalog prices without placing an order
#[utoipa::path(
    post,
    path = "/api/v1/stores/{store_id}/cart/quote",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "Priced cart", body = ApiResponse<Quote>),
        (status = 400, description = "Invalid cart", body = crate::errors::ErrorResponse)
    ),
    tag = "kiosk"
)]
pub async fn quote_cart(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<Quote> {
    let quote = state.services.checkout.quote(store_id, &request).await?;
    Ok(Json(ApiResponse::success(quote)))
}

#[utoipa::path(
    post,
    path = "/api/v1/stores/{store_id}/checkout",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<Receipt>),
        (status = 400, description = "Invalid cart or checkout details", body = crate::errors::ErrorResponse),
        (status = 404, description = "Store not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order number conflict", body = crate::errors::ErrorResponse)
    ),
    tag = "kiosk"
)]
pub async fn checkout(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Receipt>>), ServiceError> {
    let receipt = state.services.checkout.checkout(store_id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}
