use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};

/// Catalog collaborator: product lookup and stock accounting. Checkout
/// validates quantities against `get_stock` before an order is created and
/// decrements stock only at finalize.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Fetches the products backing a snapshot in one query.
    pub async fn get_products(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<product::Model>, ServiceError> {
        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids.iter().copied()))
            .all(&*self.db)
            .await?;
        Ok(products)
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_stock(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        let product = self.get_product(product_id).await?;
        Ok(product.stock)
    }

    /// Decrements stock for a finalized order line. Runs after capture, so a
    /// shortfall at this point is logged rather than failing the order.
    #[instrument(skip(self), fields(product_id = %product_id, quantity))]
    pub async fn decrement_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(
                product::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        info!("stock decremented");
        Ok(())
    }
}
