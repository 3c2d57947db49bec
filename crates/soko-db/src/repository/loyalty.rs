//! # Loyalty Repository
//!
//! Loyalty accounts, balance changes and the points ledger.
//!
//! ## Idempotency Keys
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  update_balance(account, delta, sale_id)                               │
//! │     └── loyalty_balance_applications.sale_id  (PRIMARY KEY)            │
//! │                                                                         │
//! │  append_ledger_entry(entry)                                            │
//! │     └── loyalty_ledger (sale_id, kind)        (UNIQUE)                 │
//! │         inserting an entry also bumps lifetime_earned / _redeemed      │
//! │                                                                         │
//! │  A replayed settlement hits the key, writes nothing, returns false.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Balances are read-modify-write without a version check. Two concurrent
//! redemptions by the same account can both succeed; the balance is
//! clamped at zero.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use soko_core::{LedgerEntry, LedgerEntryKind, LoyaltyAccount};

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: String,
    phone: String,
    display_name: Option<String>,
    points_balance: i64,
    lifetime_earned: i64,
    lifetime_redeemed: i64,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for LoyaltyAccount {
    fn from(row: AccountRow) -> Self {
        LoyaltyAccount {
            id: row.id,
            phone: row.phone,
            display_name: row.display_name,
            points_balance: row.points_balance,
            lifetime_earned: row.lifetime_earned,
            lifetime_redeemed: row.lifetime_redeemed,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: String,
    account_id: String,
    sale_id: String,
    kind: String,
    points: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DbError;

    fn try_from(row: LedgerRow) -> DbResult<Self> {
        let kind = LedgerEntryKind::parse(&row.kind)
            .ok_or_else(|| DbError::corrupt("loyalty_ledger.kind", &row.kind))?;
        Ok(LedgerEntry {
            id: row.id,
            account_id: row.account_id,
            sale_id: row.sale_id,
            kind,
            points: row.points,
            created_at: row.created_at,
        })
    }
}

const SELECT_ACCOUNT: &str = r#"
    SELECT id, phone, display_name, points_balance,
           lifetime_earned, lifetime_redeemed, created_at
    FROM loyalty_accounts
"#;

/// Repository for loyalty accounts and ledger.
#[derive(Debug, Clone)]
pub struct LoyaltyRepository {
    pool: SqlitePool,
}

impl LoyaltyRepository {
    /// Creates a new LoyaltyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LoyaltyRepository { pool }
    }

    /// Finds an account by normalized phone number.
    pub async fn find_by_phone(&self, phone: &str) -> DbResult<Option<LoyaltyAccount>> {
        let sql = format!("{} WHERE phone = ?1", SELECT_ACCOUNT);
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LoyaltyAccount::from))
    }

    /// Finds an account by ID.
    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<LoyaltyAccount>> {
        let sql = format!("{} WHERE id = ?1", SELECT_ACCOUNT);
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LoyaltyAccount::from))
    }

    /// Creates an account with a zero balance.
    ///
    /// If the phone already has an account, that account is returned
    /// unchanged.
    pub async fn create(&self, phone: &str, display_name: Option<&str>) -> DbResult<LoyaltyAccount> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO loyalty_accounts
                (id, phone, display_name, points_balance, lifetime_earned,
                 lifetime_redeemed, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, 0, 0, ?4, ?4)
            "#,
        )
        .bind(&id)
        .bind(phone)
        .bind(display_name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(account_id = %id, "Loyalty account created");
        }

        self.find_by_phone(phone)
            .await?
            .ok_or_else(|| DbError::not_found("Loyalty account", phone))
    }

    /// Applies a points delta for a sale, clamping the balance at zero.
    ///
    /// Returns `false` when this sale's delta was already applied.
    pub async fn update_balance(&self, account_id: &str, delta: i64, sale_id: &str) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO loyalty_balance_applications (sale_id, account_id, delta, applied_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(sale_id)
        .bind(account_id)
        .bind(delta)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            debug!(sale_id = %sale_id, account_id = %account_id, "Points delta already applied");
            tx.rollback().await?;
            return Ok(false);
        }

        let balance: Option<i64> =
            sqlx::query_scalar("SELECT points_balance FROM loyalty_accounts WHERE id = ?1")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?;
        let balance = balance.ok_or_else(|| DbError::not_found("Loyalty account", account_id))?;

        let new_balance = balance + delta;
        if new_balance < 0 {
            warn!(
                account_id = %account_id,
                sale_id = %sale_id,
                balance,
                delta,
                "Points balance would go negative, clamping to zero"
            );
        }

        sqlx::query(
            "UPDATE loyalty_accounts SET points_balance = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(account_id)
        .bind(new_balance.max(0))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(account_id = %account_id, sale_id = %sale_id, delta, "Points balance updated");
        Ok(true)
    }

    /// Appends a ledger entry and bumps the matching lifetime counter.
    ///
    /// Returns `false` when the sale already has an entry of this kind.
    pub async fn append_ledger_entry(&self, entry: &LedgerEntry) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO loyalty_ledger (id, account_id, sale_id, kind, points, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.account_id)
        .bind(&entry.sale_id)
        .bind(entry.kind.as_str())
        .bind(entry.points)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let sql = match entry.kind {
            LedgerEntryKind::Earn => {
                "UPDATE loyalty_accounts SET lifetime_earned = lifetime_earned + ?2 WHERE id = ?1"
            }
            LedgerEntryKind::Redeem => {
                "UPDATE loyalty_accounts SET lifetime_redeemed = lifetime_redeemed + ?2 WHERE id = ?1"
            }
        };
        sqlx::query(sql)
            .bind(&entry.account_id)
            .bind(entry.points)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Ledger entries written for a sale.
    pub async fn ledger_for_sale(&self, sale_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, sale_id, kind, points, created_at
            FROM loyalty_ledger
            WHERE sale_id = ?1
            ORDER BY kind
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn entry(account_id: &str, sale_id: &str, kind: LedgerEntryKind, points: i64) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            sale_id: sale_id.into(),
            kind,
            points,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_returns_existing_account() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.loyalty();

        let first = repo.create("254712345678", Some("Wanjiku")).await.unwrap();
        let second = repo.create("254712345678", Some("Other")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("Wanjiku"));
        assert_eq!(second.points_balance, 0);

        assert!(repo.find_by_phone("254700000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_balance_once_per_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.loyalty();
        let account = repo.create("254712345678", None).await.unwrap();

        assert!(repo.update_balance(&account.id, 250, "sale-1").await.unwrap());
        assert!(!repo.update_balance(&account.id, 250, "sale-1").await.unwrap());
        assert!(repo.update_balance(&account.id, -192, "sale-2").await.unwrap());

        let account = repo.find_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(account.points_balance, 58);
    }

    #[tokio::test]
    async fn test_balance_clamps_at_zero() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.loyalty();
        let account = repo.create("254712345678", None).await.unwrap();

        repo.update_balance(&account.id, -50, "sale-1").await.unwrap();

        let account = repo.find_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(account.points_balance, 0);
    }

    #[tokio::test]
    async fn test_ledger_entries_unique_per_sale_and_kind() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.loyalty();
        let account = repo.create("254712345678", None).await.unwrap();

        assert!(repo
            .append_ledger_entry(&entry(&account.id, "sale-1", LedgerEntryKind::Earn, 8))
            .await
            .unwrap());
        assert!(repo
            .append_ledger_entry(&entry(&account.id, "sale-1", LedgerEntryKind::Redeem, 200))
            .await
            .unwrap());
        assert!(!repo
            .append_ledger_entry(&entry(&account.id, "sale-1", LedgerEntryKind::Earn, 8))
            .await
            .unwrap());

        let ledger = repo.ledger_for_sale("sale-1").await.unwrap();
        assert_eq!(ledger.len(), 2);

        let account = repo.find_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(account.lifetime_earned, 8);
        assert_eq!(account.lifetime_redeemed, 200);
    }

    #[tokio::test]
    async fn test_update_unknown_account() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let result = db.loyalty().update_balance("nope", 5, "sale-1").await;
        // FK on the application row or the missing account row
        assert!(matches!(
            result,
            Err(DbError::ForeignKeyViolation { .. }) | Err(DbError::NotFound { .. })
        ));
    }
}
