use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};

const DEFAULT_CURRENCY: &str = "USD";

/// One line of an order-to-be, priced at snapshot time.
#[derive(Debug, Clone)]
pub struct LineItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Order representation returned to API consumers.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub currency: String,
    pub total_amount: Decimal,
    pub payment_session_ref: Option<String>,
    pub payer_ref: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub line_items: Vec<OrderLineResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderLineResponse {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderResponse {
    pub fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            currency: order.currency,
            total_amount: order.total_amount,
            payment_session_ref: order.payment_session_ref,
            payer_ref: order.payer_ref,
            gateway_transaction_id: order.gateway_transaction_id,
            failure_reason: order.failure_reason,
            line_items: items
                .into_iter()
                .map(|item| OrderLineResponse {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Durable order store. Single source of truth for order status; every
/// status change goes through a compare-and-swap update so concurrent
/// writers cannot both win.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a new order in `Created` from a priced line snapshot. The
    /// order row and its items are inserted in one transaction.
    #[instrument(skip(self, line_items), fields(user_id = %user_id, lines = line_items.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        line_items: Vec<LineItemInput>,
    ) -> Result<order::Model, ServiceError> {
        if line_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order requires at least one line item".to_string(),
            ));
        }
        if line_items.iter().any(|line| line.quantity <= 0) {
            return Err(ServiceError::ValidationError(
                "line item quantities must be positive".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let total_amount: Decimal = line_items
            .iter()
            .map(|line| line.unit_price * Decimal::from(line.quantity))
            .sum();

        let txn = self.db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            status: Set(OrderStatus::Created),
            currency: Set(DEFAULT_CURRENCY.to_string()),
            total_amount: Set(total_amount),
            payment_session_ref: Set(None),
            payer_ref: Set(None),
            gateway_transaction_id: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for line in line_items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        info!(order_id = %order_id, %total_amount, "order created");
        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;

        Ok(order_model)
    }

    /// Moves an order from `from` to `to` with compare-and-swap semantics:
    /// the update only succeeds when the stored status still equals `from`.
    /// A lost race surfaces as `Conflict`, which signals that the competing
    /// transition already happened.
    #[instrument(skip(self), fields(order_id = %order_id, %from, %to))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let patch = <order::ActiveModel as sea_orm::ActiveModelTrait>::default();
        self.cas_update(order_id, from, to, patch).await
    }

    /// CAS `Created -> AwaitingPayment` storing the gateway session token.
    /// The `payment_session_ref IS NULL` guard enforces the set-exactly-once
    /// invariant even if two session opens race.
    #[instrument(skip(self, session_ref), fields(order_id = %order_id))]
    pub async fn record_payment_session(
        &self,
        order_id: Uuid,
        session_ref: &str,
    ) -> Result<order::Model, ServiceError> {
        let result = OrderEntity::update_many()
            .set(order::ActiveModel {
                status: Set(OrderStatus::AwaitingPayment),
                payment_session_ref: Set(Some(session_ref.to_string())),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Created))
            .filter(order::Column::PaymentSessionRef.is_null())
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let current = self.get_order(order_id).await?;
            return Err(ServiceError::Conflict(format!(
                "payment session already recorded for order {} (status {})",
                order_id, current.status
            )));
        }

        info!(order_id = %order_id, "payment session recorded");
        self.get_order(order_id).await
    }

    /// CAS `AwaitingPayment -> Captured` storing the payer and transaction refs.
    #[instrument(skip(self, payer_ref, transaction_id), fields(order_id = %order_id))]
    pub async fn mark_captured(
        &self,
        order_id: Uuid,
        payer_ref: &str,
        transaction_id: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        let patch = order::ActiveModel {
            payer_ref: Set(Some(payer_ref.to_string())),
            gateway_transaction_id: Set(transaction_id.map(str::to_string)),
            ..Default::default()
        };
        self.cas_update(order_id, OrderStatus::AwaitingPayment, OrderStatus::Captured, patch)
            .await
    }

    /// CAS `AwaitingPayment -> Failed` recording the decline reason. Terminal.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn mark_failed(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<order::Model, ServiceError> {
        let patch = order::ActiveModel {
            failure_reason: Set(Some(reason.to_string())),
            ..Default::default()
        };
        self.cas_update(order_id, OrderStatus::AwaitingPayment, OrderStatus::Failed, patch)
            .await
    }

    /// CAS a pending order into `Cancelled`. Terminal; a later checkout for
    /// the same user creates a fresh order rather than resurrecting this one.
    #[instrument(skip(self, reason), fields(order_id = %order_id, %from))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        reason: &str,
    ) -> Result<order::Model, ServiceError> {
        if !from.is_pending() {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is {} and can no longer be cancelled",
                order_id, from
            )));
        }

        let patch = order::ActiveModel {
            failure_reason: Set(Some(reason.to_string())),
            ..Default::default()
        };
        self.cas_update(order_id, from, OrderStatus::Cancelled, patch)
            .await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// The user's single in-flight order, if any. `Created` and
    /// `AwaitingPayment` both count as pending.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn find_pending(&self, user_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.is_in([OrderStatus::Created, OrderStatus::AwaitingPayment]))
            .order_by_desc(order::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        Ok(order)
    }

    /// Pending orders created before `cutoff`; feeds the expiry sweep.
    pub async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::Status.is_in([OrderStatus::Created, OrderStatus::AwaitingPayment]))
            .filter(order::Column::CreatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;
        Ok(orders)
    }

    async fn cas_update(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        mut patch: order::ActiveModel,
    ) -> Result<order::Model, ServiceError> {
        if !from.can_transition_to(to) {
            return Err(ServiceError::InvalidStatus(format!(
                "{} -> {} is not a legal order transition",
                from, to
            )));
        }

        patch.status = Set(to);
        patch.updated_at = Set(Utc::now());

        let result = OrderEntity::update_many()
            .set(patch)
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Distinguish a missing order from a lost race.
            let current = self.get_order(order_id).await?;
            return Err(ServiceError::Conflict(format!(
                "order {} is {}, expected {}",
                order_id, current.status, from
            )));
        }

        info!(order_id = %order_id, %from, %to, "order transitioned");
        self.get_order(order_id).await
    }
}
