//! Kitchen display endpoints. All of them sit behind a session.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::{stream, Stream};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    events::Subscription,
    services::{kitchen::KitchenService, views::OrderWithItems},
    ApiResponse, ApiResult, AppState,
};

pub fn kitchen_routes() -> Router<AppState> {
    Router::new()
        .route("/stores/:store_id/kitchen/orders", get(kitchen_queue))
        .route(
            "/stores/:store_id/kitchen/orders/:order_id/start",
            post(start_preparing),
        )
        .route(
            "/stores/:store_id/kitchen/orders/:order_id/ready",
            post(mark_ready),
        )
}

/// Long-lived routes; mounted outside the request timeout
pub fn kitchen_stream_routes() -> Router<AppState> {
    Router::new().route("/stores/:store_id/kitchen/stream", get(kitchen_stream))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/kitchen/orders",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    responses(
        (status = 200, description = "Pending and preparing orders, oldest first", body = ApiResponse<Vec<OrderWithItems>>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No grant for this store")
    ),
    security(("bearer_auth" = [])),
    tag = "kitchen"
)]
pub async fn kitchen_queue(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> ApiResult<Vec<OrderWithItems>> {
    let queue = state.services.kitchen.queue(store_id).await?;
    Ok(Json(ApiResponse::success(queue)))
}

#[utoipa::path(
    post,
    path = "/api/v1/stores/{store_id}/kitchen/orders/{order_id}/start",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order is now preparing"),
        (status = 400, description = "Order is not pending", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "kitchen"
)]
pub async fn start_preparing(
    State(state): State<AppState>,
    Path((store_id, order_id)): Path<(Uuid, Uuid)>,
    auth_user: AuthUser,
) -> ApiResult<crate::entities::order::Model> {
    debug!(user_id = %auth_user.user_id, %order_id, "kitchen starts order");
    let order = state
        .services
        .kitchen
        .start_preparing(store_id, order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/stores/{store_id}/kitchen/orders/{order_id}/ready",
    params(
        ("store_id" = Uuid, Path, description = "Store ID"),
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order is ready for pickup"),
        (status = 400, description = "Order is not preparing", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "kitchen"
)]
pub async fn mark_ready(
    State(state): State<AppState>,
    Path((store_id, order_id)): Path<(Uuid, Uuid)>,
    auth_user: AuthUser,
) -> ApiResult<crate::entities::order::Model> {
    debug!(user_id = %auth_user.user_id, %order_id, "kitchen marks order ready");
    let order = state.services.kitchen.mark_ready(store_id, order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

fn queue_event(queue: &[OrderWithItems]) -> SseEvent {
    match SseEvent::default().event("queue").json_data(queue) {
        Ok(event) => event,
        Err(e) => SseEvent::default().event("error").data(e.to_string()),
    }
}

struct StreamState {
    kitchen: Arc<KitchenService>,
    subscription: Subscription,
    initial: Option<Vec<OrderWithItems>>,
}

/// The kitchen queue as a Server-Sent Events stream.
///
/// The first `queue` event is the current queue; every order change in the
/// store triggers a reload and another `queue` event. Closing the connection
/// drops the subscription.
#[utoipa::path(
    get,
    path = "/api/v1/stores/{store_id}/kitchen/stream",
    params(("store_id" = Uuid, Path, description = "Store ID")),
    responses(
        (status = 200, description = "text/event-stream of `queue` events"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No grant for this store")
    ),
    security(("bearer_auth" = [])),
    tag = "kitchen"
)]
pub async fn kitchen_stream(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ServiceError> {
    let kitchen = state.services.kitchen.clone();
    // Subscribe before the first read so no change slips in between
    let subscription = kitchen.subscribe(store_id);
    let initial = kitchen.queue(store_id).await?;

    let seed = StreamState {
        kitchen,
        subscription,
        initial: Some(initial),
    };

    let events = stream::unfold(seed, move |mut st| async move {
        if let Some(queue) = st.initial.take() {
            return Some((Ok(queue_event(&queue)), st));
        }

        let notification = st.subscription.recv().await?;
        if notification.lagged {
            debug!(%store_id, "kitchen stream lagged; reloading");
        }

        let event = match st.kitchen.queue(store_id).await {
            Ok(queue) => queue_event(&queue),
            Err(e) => {
                warn!(%store_id, error = %e, "kitchen queue reload failed");
                SseEvent::default().event("error").data(e.response_message())
            }
        };
        Some((Ok(event), st))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
