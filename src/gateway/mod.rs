pub mod paypal;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::entities::{order, order_item};
use crate::errors::ServiceError;

/// Errors surfaced by the payment provider boundary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transient transport or provider failure; the caller may retry with backoff.
    #[error("payment provider unreachable: {0}")]
    Unavailable(String),
    /// The provider rejected the request itself; retrying the same call cannot succeed.
    #[error("payment provider rejected the request: {0}")]
    Rejected(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => ServiceError::GatewayUnavailable(msg),
            GatewayError::Rejected(msg) => ServiceError::GatewayRejected(msg),
        }
    }
}

/// An approval session opened with the provider. The shopper is sent to
/// `redirect_url` and comes back through the return reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSession {
    pub session_ref: String,
    pub redirect_url: String,
}

/// Result of a capture attempt. `success == false` is a definitive decline
/// and must not be retried.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub decline_reason: Option<String>,
}

/// Stateless boundary translator over the external payment provider. Owns no
/// durable state and carries no business logic.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment session for the order and returns the shopper redirect.
    async fn create_session(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<PaymentSession, GatewayError>;

    /// Finalizes a previously approved session, moving funds.
    async fn capture(
        &self,
        session_ref: &str,
        payer_ref: &str,
    ) -> Result<CaptureOutcome, GatewayError>;
}

/// Retries `op` with exponential backoff while the provider reports as
/// unreachable. Rejections and successful responses return immediately.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(GatewayError::Rejected(msg)) => return Err(GatewayError::Rejected(msg)),
            Err(GatewayError::Unavailable(msg)) => {
                warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %msg,
                    "payment provider unavailable"
                );
                last_error = Some(msg);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    Err(GatewayError::Unavailable(
        last_error.unwrap_or_else(|| "retries exhausted".to_string()),
    ))
}
