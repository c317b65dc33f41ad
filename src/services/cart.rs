use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::cart_item::{self, Entity as CartItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::CatalogService,
    services::orders::LineItemInput,
};

/// The lines a user intends to purchase, priced at the moment checkout
/// started. Consumed by value when transcribed into an order, so later cart
/// edits can never alias into a placed order.
#[derive(Debug, Clone)]
pub struct CartSnapshot {
    pub user_id: Uuid,
    pub lines: Vec<SnapshotLine>,
}

#[derive(Debug, Clone)]
pub struct SnapshotLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl CartSnapshot {
    pub fn product_ids(&self) -> Vec<Uuid> {
        self.lines.iter().map(|line| line.product_id).collect()
    }

    pub fn into_line_items(self) -> Vec<LineItemInput> {
        self.lines
            .into_iter()
            .map(|line| LineItemInput {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect()
    }
}

/// Cart store and synchronizer. Holds working cart rows and reconciles them
/// against placed orders: snapshot at checkout start, clear the transcribed
/// rows once the order terminates.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<CatalogService>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<CatalogService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
        }
    }

    /// Adds a product to the user's cart, merging quantities when the
    /// product is already present.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id, quantity))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        // Reject unknown products up front.
        self.catalog.get_product(product_id).await?;

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;

        let item = match existing {
            Some(item) => {
                let merged = item.quantity + quantity;
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(merged);
                item.updated_at = Set(Utc::now());
                item.update(&*self.db).await?
            }
            None => {
                let now = Utc::now();
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?
            }
        };

        info!("cart item added");
        Ok(item)
    }

    pub async fn read_cart(&self, user_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        let items = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Copies the current cart into an ephemeral snapshot priced from the
    /// catalog. Fails with `EmptyCart` when there is nothing to buy.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn snapshot(&self, user_id: Uuid) -> Result<CartSnapshot, ServiceError> {
        let rows = self.read_cart(user_id).await?;
        if rows.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let product_ids: Vec<Uuid> = rows.iter().map(|row| row.product_id).collect();
        let products = self.catalog.get_products(&product_ids).await?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let product = products
                .iter()
                .find(|product| product.id == row.product_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", row.product_id))
                })?;
            lines.push(SnapshotLine {
                product_id: row.product_id,
                quantity: row.quantity,
                unit_price: product.price,
            });
        }

        Ok(CartSnapshot { user_id, lines })
    }

    /// Removes exactly the transcribed products from the user's cart. Rows
    /// for other products, including ones added after the snapshot, survive.
    #[instrument(skip(self, product_ids), fields(user_id = %user_id, products = product_ids.len()))]
    pub async fn clear_transcribed(
        &self,
        user_id: Uuid,
        product_ids: &[Uuid],
    ) -> Result<u64, ServiceError> {
        if product_ids.is_empty() {
            return Ok(0);
        }

        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.is_in(product_ids.iter().copied()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(cleared = result.rows_affected, "transcribed cart items cleared");
            self.event_sender
                .send_or_log(Event::CartCleared { user_id })
                .await;
        }

        Ok(result.rows_affected)
    }
}
