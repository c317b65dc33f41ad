use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{with_retry, PaymentGateway, PaymentSession},
    services::cart::CartService,
    services::catalog::CatalogService,
    services::orders::OrderService,
};

const EXPIRED_REASON: &str = "checkout session expired";

/// Drives the checkout state machine: validate cart, create order, open the
/// gateway session, finalize after capture, cancel abandoned orders.
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<OrderService>,
    cart: Arc<CartService>,
    catalog: Arc<CatalogService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderService>,
        cart: Arc<CartService>,
        catalog: Arc<CatalogService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            orders,
            cart,
            catalog,
            gateway,
            event_sender,
            config,
        }
    }

    /// Starts a checkout for the user.
    ///
    /// Pending-order policy: an unexpired pending order is resumed as-is; an
    /// expired one is cancelled and a fresh order is created. Orders are
    /// never resurrected, so a retry after `Failed` or `Cancelled` always
    /// produces a new order id.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn start_checkout(&self, user_id: Uuid) -> Result<order::Model, ServiceError> {
        if let Some(pending) = self.orders.find_pending(user_id).await? {
            let expires_at = pending.created_at + self.config.pending_order_ttl();
            if Utc::now() < expires_at {
                info!(order_id = %pending.id, status = %pending.status, "resuming pending order");
                return Ok(pending);
            }

            let cancelled = self
                .orders
                .cancel(pending.id, pending.status, EXPIRED_REASON)
                .await?;
            self.event_sender
                .send_or_log(Event::OrderCancelled {
                    order_id: cancelled.id,
                    reason: EXPIRED_REASON.to_string(),
                })
                .await;
        }

        let snapshot = self.cart.snapshot(user_id).await?;
        for line in &snapshot.lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "invalid quantity {} for product {}",
                    line.quantity, line.product_id
                )));
            }
            let stock = self.catalog.get_stock(line.product_id).await?;
            if line.quantity > stock {
                return Err(ServiceError::InsufficientStock(format!(
                    "product {} has {} in stock, requested {}",
                    line.product_id, stock, line.quantity
                )));
            }
        }

        self.orders
            .create_order(user_id, snapshot.into_line_items())
            .await
    }

    /// Opens a payment session with the gateway and moves the order to
    /// `AwaitingPayment`. On `GatewayUnavailable` the order stays `Created`
    /// so the caller can retry without re-snapshotting the cart.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn open_payment_session(
        &self,
        order_id: Uuid,
    ) -> Result<PaymentSession, ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        if order.status != OrderStatus::Created {
            return Err(ServiceError::Conflict(format!(
                "order {} is {}, expected {}",
                order_id,
                order.status,
                OrderStatus::Created
            )));
        }

        let items = self.orders.get_order_items(order_id).await?;

        let session = with_retry(
            self.config.gateway.retry_attempts,
            self.config.gateway.retry_base_delay(),
            || self.gateway.create_session(&order, &items),
        )
        .await
        .map_err(ServiceError::from)?;

        self.orders
            .record_payment_session(order_id, &session.session_ref)
            .await?;

        info!(session_ref = %session.session_ref, "payment session opened");
        self.event_sender
            .send_or_log(Event::PaymentSessionOpened { order_id })
            .await;

        Ok(session)
    }

    /// Completes a captured order: CAS `Captured -> Completed`, decrement
    /// stock for the snapshot lines, and clear exactly those lines from the
    /// user's cart.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn finalize(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let order = self
            .orders
            .transition(order_id, OrderStatus::Captured, OrderStatus::Completed)
            .await?;

        let items = self.orders.get_order_items(order_id).await?;
        for item in &items {
            self.catalog
                .decrement_stock(item.product_id, item.quantity)
                .await?;
        }

        let product_ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        self.cart
            .clear_transcribed(order.user_id, &product_ids)
            .await?;

        info!("order completed");
        self.event_sender
            .send_or_log(Event::OrderCompleted(order_id))
            .await;

        Ok(order)
    }

    /// Cancels a pending order. Terminal; a new checkout creates a fresh
    /// order for the same cart.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<order::Model, ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        if !order.status.is_pending() {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is {} and can no longer be cancelled",
                order_id, order.status
            )));
        }

        let cancelled = self.orders.cancel(order_id, order.status, reason).await?;
        self.event_sender
            .send_or_log(Event::OrderCancelled {
                order_id,
                reason: reason.to_string(),
            })
            .await;

        Ok(cancelled)
    }

    /// Cancels pending orders older than the configured TTL. Without this
    /// sweep an abandoned `AwaitingPayment` row would block new checkouts
    /// for its user forever.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<usize, ServiceError> {
        let cutoff = Utc::now() - self.config.pending_order_ttl();
        let stale = self.orders.find_stale_pending(cutoff).await?;

        let mut swept = 0;
        for order in stale {
            match self
                .orders
                .cancel(order.id, order.status, EXPIRED_REASON)
                .await
            {
                Ok(_) => {
                    swept += 1;
                    self.event_sender
                        .send_or_log(Event::OrderCancelled {
                            order_id: order.id,
                            reason: EXPIRED_REASON.to_string(),
                        })
                        .await;
                }
                // Lost the race to a concurrent return or cancellation; the
                // order is no longer pending, which is what the sweep wants.
                Err(ServiceError::Conflict(msg)) => {
                    warn!(order_id = %order.id, %msg, "sweep lost transition race");
                }
                Err(err) => return Err(err),
            }
        }

        if swept > 0 {
            info!(swept, "cancelled expired pending orders");
        }
        Ok(swept)
    }
}
