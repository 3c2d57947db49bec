//! # Product Repository
//!
//! Read access to the catalog for the checkout, plus the insert used by
//! seeding and tests. Catalog editing lives outside this workspace.
//!
//! ## Lookup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Scanner emits "5901234123457"                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  products (barcode = ?) LEFT JOIN stock_levels                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Product { ..., quantity_available }  ← stock at lookup time            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use soko_core::Product;

/// Row shape shared by every product query.
#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    sku: String,
    barcode: Option<String>,
    name: String,
    price_cents: i64,
    quantity_available: i64,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            sku: row.sku,
            barcode: row.barcode,
            name: row.name,
            price_cents: row.price_cents,
            quantity_available: row.quantity_available,
        }
    }
}

const SELECT_PRODUCT: &str = r#"
    SELECT
        p.id,
        p.sku,
        p.barcode,
        p.name,
        p.price_cents,
        COALESCE(s.quantity, 0) AS quantity_available
    FROM products p
    LEFT JOIN stock_levels s ON s.product_id = p.id
"#;

/// Repository for product catalog lookups.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Finds an active product by its barcode.
    pub async fn find_by_barcode(&self, barcode: &str) -> DbResult<Option<Product>> {
        debug!(barcode = %barcode, "Looking up product by barcode");

        let sql = format!("{} WHERE p.barcode = ?1 AND p.is_active = 1", SELECT_PRODUCT);
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(barcode)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Product::from))
    }

    /// Finds an active product by ID.
    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("{} WHERE p.id = ?1 AND p.is_active = 1", SELECT_PRODUCT);
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Product::from))
    }

    /// Inserts a product with its opening stock level.
    ///
    /// Used by the seed binary and tests.
    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO products (id, sku, barcode, name, price_cents, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.barcode)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO stock_levels (product_id, quantity, updated_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&product.id)
        .bind(product.quantity_available.max(0))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Counts active products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::{Database, DbConfig};

    fn soda() -> Product {
        Product {
            id: "p-soda".into(),
            sku: "SODA-500".into(),
            barcode: Some("5901234123457".into()),
            name: "Soda 500ml".into(),
            price_cents: 5_000,
            quantity_available: 12,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();
        repo.insert(&soda()).await.unwrap();

        let by_barcode = repo.find_by_barcode("5901234123457").await.unwrap().unwrap();
        assert_eq!(by_barcode, soda());

        let by_id = repo.find_by_id("p-soda").await.unwrap().unwrap();
        assert_eq!(by_id.quantity_available, 12);

        assert!(repo.find_by_barcode("0000").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();
        repo.insert(&soda()).await.unwrap();

        let mut dup = soda();
        dup.id = "p-other".into();
        dup.barcode = None;

        assert!(matches!(
            repo.insert(&dup).await,
            Err(DbError::UniqueViolation { .. })
        ));
    }
}
