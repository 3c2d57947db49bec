//! # Stock Repository
//!
//! Stock levels and the per-sale movement log that makes decrements
//! idempotent.
//!
//! ## Decrement
//! ```text
//! decrement(product, qty, sale_id)
//!      │
//!      ▼
//! BEGIN
//!   SELECT quantity FROM stock_levels          ── missing → NotFound
//!   INSERT OR IGNORE stock_movements(sale_id, product_id)
//!      │
//!      ├── ignored → already applied, ROLLBACK, return false
//!      │
//!      ▼
//!   UPDATE stock_levels SET quantity = max(0, before - qty)
//! COMMIT, return true
//! ```
//!
//! ## Concurrency
//! No version check: two tills selling the last unit both succeed and the
//! level is clamped at zero. Overselling is logged, not prevented.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Repository for stock levels.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Current stock level for a product.
    pub async fn quantity(&self, product_id: &str) -> DbResult<Option<i64>> {
        let qty: Option<i64> =
            sqlx::query_scalar("SELECT quantity FROM stock_levels WHERE product_id = ?1")
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(qty)
    }

    /// Overwrites a stock level (stock takes, seeding).
    pub async fn set_quantity(&self, product_id: &str, quantity: i64) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE stock_levels SET quantity = ?2, updated_at = ?3 WHERE product_id = ?1",
        )
        .bind(product_id)
        .bind(quantity.max(0))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Stock level", product_id));
        }
        Ok(())
    }

    /// Decrements stock for one sale line, floored at zero.
    ///
    /// Returns `false` when this `(sale_id, product_id)` was already applied.
    pub async fn decrement(&self, product_id: &str, quantity: i64, sale_id: &str) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let before: Option<i64> =
            sqlx::query_scalar("SELECT quantity FROM stock_levels WHERE product_id = ?1")
                .bind(product_id)
                .fetch_optional(&mut *tx)
                .await?;
        let before = before.ok_or_else(|| DbError::not_found("Stock level", product_id))?;

        let after = (before - quantity).max(0);
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO stock_movements
                (sale_id, product_id, quantity, before_qty, after_qty, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(sale_id)
        .bind(product_id)
        .bind(quantity)
        .bind(before)
        .bind(after)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            debug!(sale_id = %sale_id, product_id = %product_id, "Stock already decremented");
            tx.rollback().await?;
            return Ok(false);
        }

        if before < quantity {
            warn!(
                sale_id = %sale_id,
                product_id = %product_id,
                before,
                sold = quantity,
                "Sold more than stock on hand, clamping to zero"
            );
        }

        sqlx::query("UPDATE stock_levels SET quantity = ?2, updated_at = ?3 WHERE product_id = ?1")
            .bind(product_id)
            .bind(after)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(sale_id = %sale_id, product_id = %product_id, before, after, "Stock decremented");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DbError;
    use crate::{Database, DbConfig};
    use soko_core::Product;

    async fn db_with_product(qty: i64) -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products()
            .insert(&Product {
                id: "p1".into(),
                sku: "RICE-2KG".into(),
                barcode: None,
                name: "Rice 2kg".into(),
                price_cents: 32_000,
                quantity_available: qty,
            })
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_decrement_is_idempotent_per_sale() {
        let db = db_with_product(10).await;
        let stock = db.stock();

        assert!(stock.decrement("p1", 3, "sale-1").await.unwrap());
        assert!(!stock.decrement("p1", 3, "sale-1").await.unwrap());
        assert_eq!(stock.quantity("p1").await.unwrap(), Some(7));

        assert!(stock.decrement("p1", 2, "sale-2").await.unwrap());
        assert_eq!(stock.quantity("p1").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_decrement_clamps_at_zero() {
        let db = db_with_product(1).await;
        let stock = db.stock();

        assert!(stock.decrement("p1", 4, "sale-1").await.unwrap());
        assert_eq!(stock.quantity("p1").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let db = db_with_product(1).await;
        assert!(matches!(
            db.stock().decrement("nope", 1, "sale-1").await,
            Err(DbError::NotFound { .. })
        ));
        assert!(db.stock().set_quantity("nope", 5).await.is_err());
    }
}
