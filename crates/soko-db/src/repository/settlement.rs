//! # Settlement Journal Repository
//!
//! Durable state of the settlement saga and of push charges whose outcome
//! is unknown.
//!
//! ## The Journal
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  payment success                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  begin(entry)  INSERT OR IGNORE settlement_journal (attempt_id, payload)│
//! │       │        an existing entry wins, so a replay reuses the same sale │
//! │       ▼                                                                 │
//! │  mark_step(sale_persisted) → mark_step(stock_applied)                   │
//! │                            → mark_step(loyalty_applied)                 │
//! │       │                                                                 │
//! │       ├── step failed → record_failure(): attempts += 1, last_error     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ReconciliationWorker: list_incomplete() → replay pending steps         │
//! │                        attempts ≥ max → flag_for_review()               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use soko_core::{
    ChargeResolution, Money, SaleDraft, SaleRecord, SettlementEntry, SettlementStep,
    UnresolvedCharge, UnresolvedReason,
};

#[derive(Debug, sqlx::FromRow)]
struct JournalRow {
    attempt_id: String,
    payload: String,
    sale_persisted: bool,
    stock_applied: bool,
    loyalty_applied: bool,
    attempts: i64,
    last_error: Option<String>,
    needs_review: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JournalRow> for SettlementEntry {
    type Error = DbError;

    fn try_from(row: JournalRow) -> DbResult<Self> {
        let sale: SaleRecord = serde_json::from_str(&row.payload)?;
        Ok(SettlementEntry {
            attempt_id: row.attempt_id,
            sale,
            sale_persisted: row.sale_persisted,
            stock_applied: row.stock_applied,
            loyalty_applied: row.loyalty_applied,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            needs_review: row.needs_review,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChargeRow {
    request_id: String,
    attempt_id: String,
    amount_cents: i64,
    phone: String,
    draft: String,
    reason: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChargeRow> for UnresolvedCharge {
    type Error = DbError;

    fn try_from(row: ChargeRow) -> DbResult<Self> {
        let draft: SaleDraft = serde_json::from_str(&row.draft)?;
        let reason = UnresolvedReason::parse(&row.reason)
            .ok_or_else(|| DbError::corrupt("unresolved_charges.reason", &row.reason))?;
        Ok(UnresolvedCharge {
            request_id: row.request_id,
            attempt_id: row.attempt_id,
            amount: Money::from_cents(row.amount_cents),
            phone: row.phone,
            draft,
            reason,
            created_at: row.created_at,
        })
    }
}

const SELECT_ENTRY: &str = r#"
    SELECT attempt_id, payload, sale_persisted, stock_applied, loyalty_applied,
           attempts, last_error, needs_review, created_at, updated_at
    FROM settlement_journal
"#;

/// Repository for the settlement journal and unresolved charges.
#[derive(Debug, Clone)]
pub struct SettlementRepository {
    pool: SqlitePool,
}

impl SettlementRepository {
    /// Creates a new SettlementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SettlementRepository { pool }
    }

    // =========================================================================
    // Settlement Journal
    // =========================================================================

    /// Opens a journal entry, or returns the one already recorded for the
    /// same payment attempt.
    pub async fn begin(&self, entry: &SettlementEntry) -> DbResult<SettlementEntry> {
        let payload = serde_json::to_string(&entry.sale)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO settlement_journal (
                attempt_id, sale_id, payload,
                sale_persisted, stock_applied, loyalty_applied,
                attempts, last_error, needs_review, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, 0, ?7, ?7)
            "#,
        )
        .bind(&entry.attempt_id)
        .bind(&entry.sale.id)
        .bind(&payload)
        .bind(entry.sale_persisted)
        .bind(entry.stock_applied)
        .bind(entry.loyalty_applied)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(attempt_id = %entry.attempt_id, "Settlement already journaled");
        }

        self.get(&entry.attempt_id)
            .await?
            .ok_or_else(|| DbError::not_found("Settlement", &entry.attempt_id))
    }

    /// Gets the journal entry for a payment attempt.
    pub async fn get(&self, attempt_id: &str) -> DbResult<Option<SettlementEntry>> {
        let sql = format!("{} WHERE attempt_id = ?1", SELECT_ENTRY);
        let row: Option<JournalRow> = sqlx::query_as(&sql)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SettlementEntry::try_from).transpose()
    }

    /// Records that a saga step has been applied.
    pub async fn mark_step(&self, attempt_id: &str, step: SettlementStep) -> DbResult<()> {
        let sql = match step {
            SettlementStep::SalePersisted => {
                "UPDATE settlement_journal SET sale_persisted = 1, updated_at = ?2 WHERE attempt_id = ?1"
            }
            SettlementStep::StockApplied => {
                "UPDATE settlement_journal SET stock_applied = 1, updated_at = ?2 WHERE attempt_id = ?1"
            }
            SettlementStep::LoyaltyApplied => {
                "UPDATE settlement_journal SET loyalty_applied = 1, updated_at = ?2 WHERE attempt_id = ?1"
            }
        };

        let result = sqlx::query(sql)
            .bind(attempt_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Settlement", attempt_id));
        }
        Ok(())
    }

    /// Records a failed settlement run.
    ///
    /// ## Returns
    /// The attempt counter after the increment.
    pub async fn record_failure(&self, attempt_id: &str, error: &str) -> DbResult<u32> {
        let attempts: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE settlement_journal
            SET attempts = attempts + 1, last_error = ?2, updated_at = ?3
            WHERE attempt_id = ?1
            RETURNING attempts
            "#,
        )
        .bind(attempt_id)
        .bind(error)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let attempts = attempts.ok_or_else(|| DbError::not_found("Settlement", attempt_id))?;
        Ok(attempts.max(0) as u32)
    }

    /// Marks an entry for manual reconciliation. The worker skips it from
    /// then on.
    pub async fn flag_for_review(&self, attempt_id: &str) -> DbResult<()> {
        warn!(attempt_id = %attempt_id, "Settlement flagged for manual review");

        sqlx::query(
            "UPDATE settlement_journal SET needs_review = 1, updated_at = ?2 WHERE attempt_id = ?1",
        )
        .bind(attempt_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Incomplete entries still eligible for automatic retry, oldest first.
    pub async fn list_incomplete(&self, limit: u32) -> DbResult<Vec<SettlementEntry>> {
        let sql = format!(
            r#"{}
            WHERE needs_review = 0
              AND (sale_persisted = 0 OR stock_applied = 0 OR loyalty_applied = 0)
            ORDER BY created_at
            LIMIT ?1
            "#,
            SELECT_ENTRY
        );

        let rows: Vec<JournalRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SettlementEntry::try_from).collect()
    }

    /// Entries waiting for an operator.
    pub async fn list_needing_review(&self) -> DbResult<Vec<SettlementEntry>> {
        let sql = format!("{} WHERE needs_review = 1 ORDER BY created_at", SELECT_ENTRY);
        let rows: Vec<JournalRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(SettlementEntry::try_from).collect()
    }

    // =========================================================================
    // Unresolved Charges
    // =========================================================================

    /// Records a push charge with unknown outcome.
    ///
    /// Returns `false` when the request id was already recorded.
    pub async fn record_unresolved(&self, charge: &UnresolvedCharge) -> DbResult<bool> {
        let draft = serde_json::to_string(&charge.draft)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO unresolved_charges (
                request_id, attempt_id, amount_cents, phone, draft, reason, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'open', ?7)
            "#,
        )
        .bind(&charge.request_id)
        .bind(&charge.attempt_id)
        .bind(charge.amount.cents())
        .bind(&charge.phone)
        .bind(&draft)
        .bind(charge.reason.as_str())
        .bind(charge.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Open unresolved charges, oldest first.
    pub async fn list_unresolved(&self) -> DbResult<Vec<UnresolvedCharge>> {
        let rows: Vec<ChargeRow> = sqlx::query_as(
            r#"
            SELECT request_id, attempt_id, amount_cents, phone, draft, reason, created_at
            FROM unresolved_charges
            WHERE status = 'open'
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UnresolvedCharge::try_from).collect()
    }

    /// Closes out an unresolved charge.
    pub async fn resolve_unresolved(
        &self,
        request_id: &str,
        resolution: ChargeResolution,
        note: Option<&str>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE unresolved_charges
            SET status = ?2, resolution_note = ?3, resolved_at = ?4
            WHERE request_id = ?1
            "#,
        )
        .bind(request_id)
        .bind(resolution.as_str())
        .bind(note)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Unresolved charge", request_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use soko_core::{CartTotals, PaymentMethod};

    fn sale(attempt: &str, with_account: bool) -> SaleRecord {
        SaleRecord {
            id: format!("sale-{}", attempt),
            payment_attempt_id: attempt.into(),
            receipt_number: "260314-092653-0001".into(),
            lines: vec![],
            subtotal_cents: 100_000,
            loyalty_discount_cents: 0,
            tax_cents: 0,
            total_cents: 100_000,
            payment_method: PaymentMethod::Cash,
            amount_tendered_cents: Some(100_000),
            change_cents: Some(0),
            settled_amount_cents: Some(100_000),
            amount_mismatch: false,
            customer_phone: None,
            loyalty_account_id: with_account.then(|| "acc-1".to_string()),
            points_earned: 0,
            points_redeemed: 0,
            external_receipt_ref: None,
            created_at: Utc::now(),
        }
    }

    fn charge(request_id: &str) -> UnresolvedCharge {
        UnresolvedCharge {
            request_id: request_id.into(),
            attempt_id: "att-9".into(),
            amount: Money::from_major(1160),
            phone: "254712345678".into(),
            draft: SaleDraft {
                lines: vec![],
                totals: CartTotals::empty(),
                customer_phone: Some("254712345678".into()),
                loyalty_account_id: None,
            },
            reason: UnresolvedReason::PollBudgetExhausted,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_begin_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settlements();

        let first = repo.begin(&SettlementEntry::new(sale("att-1", true))).await.unwrap();

        // A replay builds a new sale id; the journaled one wins
        let mut replay = sale("att-1", true);
        replay.id = "sale-other".into();
        let second = repo.begin(&SettlementEntry::new(replay)).await.unwrap();

        assert_eq!(first.sale.id, second.sale.id);
        assert_eq!(second.sale.id, "sale-att-1");
    }

    #[tokio::test]
    async fn test_steps_and_incomplete_listing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settlements();
        repo.begin(&SettlementEntry::new(sale("att-1", false))).await.unwrap();

        assert_eq!(repo.list_incomplete(10).await.unwrap().len(), 1);

        repo.mark_step("att-1", SettlementStep::SalePersisted).await.unwrap();
        repo.mark_step("att-1", SettlementStep::StockApplied).await.unwrap();

        let entry = repo.get("att-1").await.unwrap().unwrap();
        assert!(entry.is_complete());
        assert!(repo.list_incomplete(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_and_review() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settlements();
        repo.begin(&SettlementEntry::new(sale("att-1", true))).await.unwrap();

        assert_eq!(repo.record_failure("att-1", "db locked").await.unwrap(), 1);
        assert_eq!(repo.record_failure("att-1", "db locked").await.unwrap(), 2);

        let entry = repo.get("att-1").await.unwrap().unwrap();
        assert_eq!(entry.last_error.as_deref(), Some("db locked"));

        repo.flag_for_review("att-1").await.unwrap();
        assert!(repo.list_incomplete(10).await.unwrap().is_empty());
        assert_eq!(repo.list_needing_review().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_charges() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settlements();

        assert!(repo.record_unresolved(&charge("req-1")).await.unwrap());
        assert!(!repo.record_unresolved(&charge("req-1")).await.unwrap());

        let open = repo.list_unresolved().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].amount, Money::from_major(1160));
        assert_eq!(open[0].reason, UnresolvedReason::PollBudgetExhausted);

        repo.resolve_unresolved("req-1", ChargeResolution::Closed, Some("cancelled"))
            .await
            .unwrap();
        assert!(repo.list_unresolved().await.unwrap().is_empty());

        assert!(repo
            .resolve_unresolved("req-x", ChargeResolution::Settled, None)
            .await
            .is_err());
    }
}
