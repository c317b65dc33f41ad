use axum::Json;
use utoipa::OpenApi;

use crate::entities::order::OrderStatus;
use crate::errors::ErrorResponse;
use crate::gateway::PaymentSession;
use crate::handlers;
use crate::services::orders::{OrderLineResponse, OrderResponse};
use crate::services::reconciler::ReconcileOutcome;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Checkout API",
        description = "Checkout and payment-capture lifecycle: cart snapshot, order creation, gateway handoff, and return reconciliation"
    ),
    paths(
        handlers::checkout::start_checkout,
        handlers::checkout::open_payment_session,
        handlers::checkout::payment_return,
        handlers::orders::get_order,
        handlers::orders::find_pending_order,
        handlers::orders::cancel_order,
        handlers::carts::add_cart_item,
        handlers::carts::get_cart,
    ),
    components(schemas(
        OrderStatus,
        OrderResponse,
        OrderLineResponse,
        PaymentSession,
        ReconcileOutcome,
        ErrorResponse,
        handlers::checkout::StartCheckoutRequest,
        handlers::orders::CancelOrderRequest,
        handlers::carts::AddCartItemRequest,
        handlers::carts::CartResponse,
        handlers::carts::CartLineResponse,
    )),
    tags(
        (name = "Checkout", description = "Checkout lifecycle and gateway return handling"),
        (name = "Orders", description = "Order lookup and cancellation"),
        (name = "Carts", description = "Cart store surface"),
    )
)]
pub struct ApiDoc;

/// Serves the generated OpenAPI document.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
