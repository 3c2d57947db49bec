//! # Sale Repository
//!
//! Persists completed sales. A sale row is written exactly once per payment
//! attempt; `payment_attempt_id` is the idempotency key.
//!
//! ## Sale Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert(sale)                                                          │
//! │       │                                                                 │
//! │       ├── sale for this payment attempt exists? → return its id         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────── SINGLE TRANSACTION ────────────────────┐          │
//! │  │  INSERT INTO sales (...)                                   │          │
//! │  │  INSERT INTO sale_lines (...) × N   (price/name snapshot)  │          │
//! │  └────────────────────────────────────────────────────────────┘          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT → sale id                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use soko_core::{PaymentMethod, SaleLine, SaleRecord};

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    payment_attempt_id: String,
    receipt_number: String,
    subtotal_cents: i64,
    loyalty_discount_cents: i64,
    tax_cents: i64,
    total_cents: i64,
    payment_method: String,
    amount_tendered_cents: Option<i64>,
    change_cents: Option<i64>,
    settled_amount_cents: Option<i64>,
    amount_mismatch: bool,
    customer_phone: Option<String>,
    loyalty_account_id: Option<String>,
    points_earned: i64,
    points_redeemed: i64,
    external_receipt_ref: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SaleLineRow {
    product_id: String,
    sku: String,
    name: String,
    unit_price_cents: i64,
    quantity: i64,
    line_total_cents: i64,
}

impl From<SaleLineRow> for SaleLine {
    fn from(row: SaleLineRow) -> Self {
        SaleLine {
            product_id: row.product_id,
            sku: row.sku,
            name: row.name,
            unit_price_cents: row.unit_price_cents,
            quantity: row.quantity,
            line_total_cents: row.line_total_cents,
        }
    }
}

impl SaleRow {
    fn into_record(self, lines: Vec<SaleLine>) -> DbResult<SaleRecord> {
        let payment_method = PaymentMethod::parse(&self.payment_method)
            .ok_or_else(|| DbError::corrupt("sales.payment_method", &self.payment_method))?;

        Ok(SaleRecord {
            id: self.id,
            payment_attempt_id: self.payment_attempt_id,
            receipt_number: self.receipt_number,
            lines,
            subtotal_cents: self.subtotal_cents,
            loyalty_discount_cents: self.loyalty_discount_cents,
            tax_cents: self.tax_cents,
            total_cents: self.total_cents,
            payment_method,
            amount_tendered_cents: self.amount_tendered_cents,
            change_cents: self.change_cents,
            settled_amount_cents: self.settled_amount_cents,
            amount_mismatch: self.amount_mismatch,
            customer_phone: self.customer_phone,
            loyalty_account_id: self.loyalty_account_id,
            points_earned: self.points_earned,
            points_redeemed: self.points_redeemed,
            external_receipt_ref: self.external_receipt_ref,
            created_at: self.created_at,
        })
    }
}

const SELECT_SALE: &str = r#"
    SELECT
        id, payment_attempt_id, receipt_number,
        subtotal_cents, loyalty_discount_cents, tax_cents, total_cents,
        payment_method, amount_tendered_cents, change_cents,
        settled_amount_cents, amount_mismatch,
        customer_phone, loyalty_account_id, points_earned, points_redeemed,
        external_receipt_ref, created_at
    FROM sales
"#;

/// Repository for completed sales.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Persists a sale and its lines.
    ///
    /// ## Returns
    /// The id of the stored sale. If a sale already exists for the same
    /// payment attempt, that sale's id is returned and nothing is written.
    pub async fn insert(&self, sale: &SaleRecord) -> DbResult<String> {
        if let Some(existing) = self.existing_id_for_attempt(&sale.payment_attempt_id).await? {
            debug!(
                sale_id = %existing,
                attempt_id = %sale.payment_attempt_id,
                "Sale already persisted for payment attempt"
            );
            return Ok(existing);
        }

        debug!(id = %sale.id, receipt_number = %sale.receipt_number, "Inserting sale");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, payment_attempt_id, receipt_number,
                subtotal_cents, loyalty_discount_cents, tax_cents, total_cents,
                payment_method, amount_tendered_cents, change_cents,
                settled_amount_cents, amount_mismatch,
                customer_phone, loyalty_account_id, points_earned, points_redeemed,
                external_receipt_ref, created_at
            ) VALUES (
                ?1, ?2, ?3,
                ?4, ?5, ?6, ?7,
                ?8, ?9, ?10,
                ?11, ?12,
                ?13, ?14, ?15, ?16,
                ?17, ?18
            )
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.payment_attempt_id)
        .bind(&sale.receipt_number)
        .bind(sale.subtotal_cents)
        .bind(sale.loyalty_discount_cents)
        .bind(sale.tax_cents)
        .bind(sale.total_cents)
        .bind(sale.payment_method.as_str())
        .bind(sale.amount_tendered_cents)
        .bind(sale.change_cents)
        .bind(sale.settled_amount_cents)
        .bind(sale.amount_mismatch)
        .bind(&sale.customer_phone)
        .bind(&sale.loyalty_account_id)
        .bind(sale.points_earned)
        .bind(sale.points_redeemed)
        .bind(&sale.external_receipt_ref)
        .bind(sale.created_at)
        .execute(&mut *tx)
        .await?;

        for (line_no, line) in sale.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sale_lines (
                    sale_id, line_no, product_id, sku, name,
                    unit_price_cents, quantity, line_total_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&sale.id)
            .bind(line_no as i64)
            .bind(&line.product_id)
            .bind(&line.sku)
            .bind(&line.name)
            .bind(line.unit_price_cents)
            .bind(line.quantity)
            .bind(line.line_total_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(sale.id.clone())
    }

    async fn existing_id_for_attempt(&self, attempt_id: &str) -> DbResult<Option<String>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM sales WHERE payment_attempt_id = ?1")
                .bind(attempt_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    /// Gets a sale with its lines.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<SaleRecord>> {
        let sql = format!("{} WHERE id = ?1", SELECT_SALE);
        let row: Option<SaleRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let lines = self.get_lines(&row.id).await?;
                Ok(Some(row.into_record(lines)?))
            }
            None => Ok(None),
        }
    }

    /// Gets the sale paid for by a payment attempt.
    pub async fn find_by_attempt(&self, attempt_id: &str) -> DbResult<Option<SaleRecord>> {
        match self.existing_id_for_attempt(attempt_id).await? {
            Some(id) => self.get_by_id(&id).await,
            None => Ok(None),
        }
    }

    /// Gets the lines of a sale in order.
    pub async fn get_lines(&self, sale_id: &str) -> DbResult<Vec<SaleLine>> {
        let rows: Vec<SaleLineRow> = sqlx::query_as(
            r#"
            SELECT product_id, sku, name, unit_price_cents, quantity, line_total_cents
            FROM sale_lines
            WHERE sale_id = ?1
            ORDER BY line_no
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SaleLine::from).collect())
    }

    /// Number of stored sales.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use chrono::{TimeZone, Utc};
    use soko_core::{PaymentMethod, SaleLine, SaleRecord};

    fn sale(id: &str, attempt: &str) -> SaleRecord {
        SaleRecord {
            id: id.into(),
            payment_attempt_id: attempt.into(),
            receipt_number: "260314-092653-0042".into(),
            lines: vec![
                SaleLine {
                    product_id: "p1".into(),
                    sku: "SODA-500".into(),
                    name: "Soda 500ml".into(),
                    unit_price_cents: 50_000,
                    quantity: 2,
                    line_total_cents: 100_000,
                },
                SaleLine {
                    product_id: "p2".into(),
                    sku: "BREAD".into(),
                    name: "Bread".into(),
                    unit_price_cents: 6_500,
                    quantity: 1,
                    line_total_cents: 6_500,
                },
            ],
            subtotal_cents: 106_500,
            loyalty_discount_cents: 0,
            tax_cents: 17_040,
            total_cents: 123_540,
            payment_method: PaymentMethod::MobileMoney,
            amount_tendered_cents: None,
            change_cents: None,
            settled_amount_cents: Some(123_600),
            amount_mismatch: false,
            customer_phone: Some("254712345678".into()),
            loyalty_account_id: None,
            points_earned: 0,
            points_redeemed: 0,
            external_receipt_ref: Some("QGH7XK2L".into()),
            created_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();
        let record = sale("sale-1", "att-1");

        let id = repo.insert(&record).await.unwrap();
        assert_eq!(id, "sale-1");

        let stored = repo.get_by_id("sale-1").await.unwrap().unwrap();
        assert_eq!(stored, record);

        let by_attempt = repo.find_by_attempt("att-1").await.unwrap().unwrap();
        assert_eq!(by_attempt.id, "sale-1");
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_per_attempt() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        repo.insert(&sale("sale-1", "att-1")).await.unwrap();
        // Same attempt, freshly generated sale id
        let id = repo.insert(&sale("sale-2", "att-1")).await.unwrap();

        assert_eq!(id, "sale-1");
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(repo.get_by_id("sale-2").await.unwrap().is_none());
    }
}
