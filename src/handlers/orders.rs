use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::orders::OrderResponse;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PendingOrderQuery {
    pub user_id: Uuid,
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/pending", get(find_pending_order))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
}

/// Get an order with its line items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    let items = state.services.orders.get_order_items(id).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_parts(
        order, items,
    ))))
}

/// The user's current pending order, if any
#[utoipa::path(
    get,
    path = "/api/v1/orders/pending",
    params(("user_id" = Uuid, Query, description = "User ID")),
    responses(
        (status = 200, description = "Pending order or null", body = ApiResponse<Option<OrderResponse>>)
    ),
    tag = "Orders"
)]
pub async fn find_pending_order(
    State(state): State<AppState>,
    Query(query): Query<PendingOrderQuery>,
) -> Result<Json<ApiResponse<Option<OrderResponse>>>, ServiceError> {
    let pending = state.services.orders.find_pending(query.user_id).await?;

    let response = match pending {
        Some(order) => {
            let items = state.services.orders.get_order_items(order.id).await?;
            Some(OrderResponse::from_parts(order, items))
        }
        None => None,
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Cancel a pending order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order is no longer cancellable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelOrderRequest>>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let reason = body
        .and_then(|Json(request)| request.reason)
        .unwrap_or_else(|| "cancelled by user".to_string());

    let order = state.services.checkout.cancel(id, &reason).await?;
    let items = state.services.orders.get_order_items(id).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_parts(
        order, items,
    ))))
}
