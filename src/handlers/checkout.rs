use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::gateway::PaymentSession;
use crate::services::orders::OrderResponse;
use crate::services::reconciler::ReconcileOutcome;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartCheckoutRequest {
    /// The session's authenticated user
    pub user_id: Uuid,
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(start_checkout))
        .route("/:order_id/session", post(open_payment_session))
        .route("/return", get(payment_return))
}

/// Start (or resume) a checkout from the user's cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = StartCheckoutRequest,
    responses(
        (status = 201, description = "Order created or pending order resumed", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Empty cart or invalid quantities", body = crate::errors::ErrorResponse),
        (status = 422, description = "Requested quantity exceeds stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn start_checkout(
    State(state): State<AppState>,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state
        .services
        .checkout
        .start_checkout(request.user_id)
        .await?;
    let items = state.services.orders.get_order_items(order.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderResponse::from_parts(order, items))),
    ))
}

/// Open a payment session with the gateway for a created order
#[utoipa::path(
    post,
    path = "/api/v1/checkout/{order_id}/session",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Session opened; redirect the shopper", body = ApiResponse<PaymentSession>),
        (status = 409, description = "Order is not awaiting a session", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment gateway unavailable; retry later", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn open_payment_session(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentSession>>, ServiceError> {
    let session = state
        .services
        .checkout
        .open_payment_session(order_id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

/// Gateway return redirect: reconcile the payload and capture the payment.
/// Recognizes the provider's key aliases for the payment and payer tokens;
/// the internal order id may come from the URL or the user's pending order.
#[utoipa::path(
    get,
    path = "/api/v1/checkout/return",
    responses(
        (status = 200, description = "Terminal outcome of the capture attempt", body = ApiResponse<ReconcileOutcome>),
        (status = 400, description = "Return payload incomplete; capture not attempted", body = crate::errors::ErrorResponse),
        (status = 409, description = "Return is stale or already processed", body = crate::errors::ErrorResponse),
        (status = 503, description = "Payment gateway unavailable; retry the return", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn payment_return(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ApiResponse<ReconcileOutcome>>, ServiceError> {
    let user_id = params
        .get("userId")
        .and_then(|value| Uuid::parse_str(value).ok());

    let outcome = state
        .services
        .reconciler
        .reconcile(user_id, &params)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
