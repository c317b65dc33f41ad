use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    pub user_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartLineResponse {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartResponse {
    pub user_id: Uuid,
    pub items: Vec<CartLineResponse>,
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/items", post(add_cart_item))
        .route("/:user_id", get(get_cart))
}

/// Add a product to the user's cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/items",
    request_body = AddCartItemRequest,
    responses(
        (status = 201, description = "Cart updated", body = ApiResponse<CartResponse>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    Json(request): Json<AddCartItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CartResponse>>), ServiceError> {
    request.validate()?;

    state
        .services
        .cart
        .add_item(request.user_id, request.product_id, request.quantity)
        .await?;

    let cart = cart_response(&state, request.user_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(cart))))
}

/// Read the user's cart
#[utoipa::path(
    get,
    path = "/api/v1/carts/{user_id}",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Current cart lines", body = ApiResponse<CartResponse>)
    ),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartResponse>>, ServiceError> {
    let cart = cart_response(&state, user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

async fn cart_response(state: &AppState, user_id: Uuid) -> Result<CartResponse, ServiceError> {
    let items = state.services.cart.read_cart(user_id).await?;
    Ok(CartResponse {
        user_id,
        items: items
            .into_iter()
            .map(|item| CartLineResponse {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect(),
    })
}
