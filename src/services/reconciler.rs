use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::order::OrderStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{with_retry, PaymentGateway},
    services::checkout::CheckoutService,
    services::orders::OrderService,
};

/// Provider key aliases observed on return redirects. Different provider
/// flows name the same logical field differently, so all variants normalize
/// to one canonical shape before any validation runs.
const PAYMENT_REF_KEYS: &[&str] = &["paymentId", "paymentID", "token"];
const PAYER_REF_KEYS: &[&str] = &["PayerID", "payerID", "PayerId"];
const ORDER_ID_KEY: &str = "orderId";

/// Canonical, fully validated return payload. Only normalization produces
/// this; holding one means all three correlation tokens are present.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub gateway_payment_ref: String,
    pub gateway_payer_ref: String,
    pub order_id: Uuid,
}

/// Final outcome reported to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReconcileOutcome {
    pub order_id: Uuid,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Consumes the gateway's asynchronous return redirect. The payload arrives
/// over an untrusted, user-navigable channel, so everything is validated
/// against the pending order before capture is invoked.
#[derive(Clone)]
pub struct ReturnReconciler {
    orders: Arc<OrderService>,
    checkout: Arc<CheckoutService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl ReturnReconciler {
    pub fn new(
        orders: Arc<OrderService>,
        checkout: Arc<CheckoutService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            orders,
            checkout,
            gateway,
            event_sender,
            config,
        }
    }

    /// Validates the return payload and drives capture to a terminal order
    /// state.
    ///
    /// A partial or unrecognized payload never reaches the gateway: a
    /// malformed capture call could leave the order stuck in
    /// `AwaitingPayment` with an unusable session reference.
    #[instrument(skip(self, params), fields(user_id = ?user_id))]
    pub async fn reconcile(
        &self,
        user_id: Option<Uuid>,
        params: &HashMap<String, String>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let request = self.normalize(user_id, params).await?;

        let order = self.orders.get_order(request.order_id).await?;
        if order.status != OrderStatus::AwaitingPayment {
            // Replayed or re-entrant return; the first pass already settled it.
            return Err(ServiceError::StaleOrder(format!(
                "order {} is already {}",
                order.id, order.status
            )));
        }

        // The returned payment ref must match the session this order opened.
        // A mismatch means the redirect belongs to a superseded attempt.
        match order.payment_session_ref.as_deref() {
            Some(stored) if stored == request.gateway_payment_ref => {}
            _ => {
                warn!(order_id = %order.id, "return does not match the order's payment session");
                return Err(ServiceError::StaleOrder(format!(
                    "return does not match the payment session of order {}",
                    order.id
                )));
            }
        }

        let outcome = with_retry(
            self.config.gateway.retry_attempts,
            self.config.gateway.retry_base_delay(),
            || {
                self.gateway
                    .capture(&request.gateway_payment_ref, &request.gateway_payer_ref)
            },
        )
        .await
        .map_err(ServiceError::from)?;

        if outcome.success {
            self.orders
                .mark_captured(
                    order.id,
                    &request.gateway_payer_ref,
                    outcome.transaction_id.as_deref(),
                )
                .await?;
            self.event_sender
                .send_or_log(Event::PaymentCaptured { order_id: order.id })
                .await;

            let completed = self.checkout.finalize(order.id).await?;
            info!(order_id = %order.id, "payment captured and order completed");

            Ok(ReconcileOutcome {
                order_id: order.id,
                status: completed.status,
                reason: None,
            })
        } else {
            let reason = outcome
                .decline_reason
                .unwrap_or_else(|| "payment declined".to_string());
            self.orders.mark_failed(order.id, &reason).await?;
            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    order_id: order.id,
                    reason: reason.clone(),
                })
                .await;

            Ok(ReconcileOutcome {
                order_id: order.id,
                status: OrderStatus::Failed,
                reason: Some(reason),
            })
        }
    }

    /// Maps the raw parameter bag to the canonical `CaptureRequest`.
    ///
    /// The order id prefers the explicit correlation token in the URL and
    /// falls back to the session's pending order; the gateway's own payment
    /// ref is never used as the order key. Unknown shapes fail closed.
    async fn normalize(
        &self,
        user_id: Option<Uuid>,
        params: &HashMap<String, String>,
    ) -> Result<CaptureRequest, ServiceError> {
        let payment_ref = first_present(params, PAYMENT_REF_KEYS);
        let payer_ref = first_present(params, PAYER_REF_KEYS);

        let order_id = match first_present(params, &[ORDER_ID_KEY]) {
            Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| {
                ServiceError::IncompleteReturn("order reference is malformed".to_string())
            })?),
            None => match user_id {
                Some(user_id) => self
                    .orders
                    .find_pending(user_id)
                    .await?
                    .map(|order| order.id),
                None => None,
            },
        };

        match (payment_ref, payer_ref, order_id) {
            (Some(payment_ref), Some(payer_ref), Some(order_id)) => Ok(CaptureRequest {
                gateway_payment_ref: payment_ref.to_string(),
                gateway_payer_ref: payer_ref.to_string(),
                order_id,
            }),
            _ => Err(ServiceError::IncompleteReturn(
                "payment, payer, and order references are all required".to_string(),
            )),
        }
    }
}

/// First non-empty value among the given key aliases. Blank values count as
/// absent.
fn first_present<'a>(params: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| params.get(*key))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}
