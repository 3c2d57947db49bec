//! # Record Store Seams
//!
//! The checkout talks to its record stores only through these traits. The
//! SQLite repositories from `soko-db` implement them here; `memory` has
//! in-process versions for tests.
//!
//! ```text
//! ┌──────────────────────┐        ┌────────────────────────────────────┐
//! │  SettlementReconciler│──────► │ SaleStore         insert (per attempt)
//! │                      │──────► │ StockStore        decrement (per sale, product)
//! │                      │──────► │ LoyaltyStore      balance (per sale),
//! │                      │        │                   ledger (per sale, kind)
//! │                      │──────► │ SettlementJournal saga state, unresolved
//! └──────────────────────┘        └────────────────────────────────────┘
//! ```
//!
//! Every write is keyed so that a replay is a no-op. None of the stores
//! offers compare-and-swap: concurrent tills race on stock and balances
//! and the last write wins.

use std::sync::Arc;

use async_trait::async_trait;

use soko_core::{
    ChargeResolution, LedgerEntry, LoyaltyAccount, Product, SaleRecord, SettlementEntry,
    SettlementStep, UnresolvedCharge,
};
use soko_db::{
    Database, LoyaltyRepository, ProductRepository, SaleRepository, SettlementRepository,
    StockRepository,
};

use crate::error::StoreResult;

// =============================================================================
// Store Traits
// =============================================================================

/// Product lookups for scanning and cart refreshes.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_barcode(&self, code: &str) -> StoreResult<Option<Product>>;
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Product>>;
}

/// Stock levels.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Decrements stock, floored at zero. `false` when this
    /// `(sale_id, product_id)` was already applied.
    async fn decrement(&self, product_id: &str, quantity: i64, sale_id: &str) -> StoreResult<bool>;
}

/// Loyalty accounts and their ledger.
#[async_trait]
pub trait LoyaltyStore: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<LoyaltyAccount>>;

    /// Creates an account, or returns the one already registered to `phone`.
    async fn create(&self, phone: &str, display_name: Option<&str>) -> StoreResult<LoyaltyAccount>;

    /// Applies `delta` once per sale. `false` on replay.
    async fn update_balance(&self, account_id: &str, delta: i64, sale_id: &str) -> StoreResult<bool>;

    /// Appends once per `(sale_id, kind)`. `false` on replay.
    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> StoreResult<bool>;
}

/// Completed sales.
#[async_trait]
pub trait SaleStore: Send + Sync {
    /// Returns the stored sale id; the existing id when the payment attempt
    /// already has a sale.
    async fn insert(&self, sale: &SaleRecord) -> StoreResult<String>;
    async fn find_by_attempt(&self, attempt_id: &str) -> StoreResult<Option<SaleRecord>>;
}

/// Durable settlement saga state and unresolved push charges.
#[async_trait]
pub trait SettlementJournal: Send + Sync {
    /// Opens an entry or returns the one already journaled for the attempt.
    async fn begin(&self, entry: &SettlementEntry) -> StoreResult<SettlementEntry>;
    async fn mark_step(&self, attempt_id: &str, step: SettlementStep) -> StoreResult<()>;
    /// Returns the attempt count after the increment.
    async fn record_failure(&self, attempt_id: &str, error: &str) -> StoreResult<u32>;
    async fn flag_for_review(&self, attempt_id: &str) -> StoreResult<()>;
    async fn list_incomplete(&self, limit: u32) -> StoreResult<Vec<SettlementEntry>>;

    async fn record_unresolved(&self, charge: &UnresolvedCharge) -> StoreResult<bool>;
    async fn list_unresolved(&self) -> StoreResult<Vec<UnresolvedCharge>>;
    async fn resolve_unresolved(
        &self,
        request_id: &str,
        resolution: ChargeResolution,
        note: Option<&str>,
    ) -> StoreResult<()>;
}

// =============================================================================
// Store Bundle
// =============================================================================

/// All stores a checkout service needs.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn ProductCatalog>,
    pub stock: Arc<dyn StockStore>,
    pub loyalty: Arc<dyn LoyaltyStore>,
    pub sales: Arc<dyn SaleStore>,
    pub journal: Arc<dyn SettlementJournal>,
}

impl Stores {
    /// Stores backed by the SQLite repositories.
    pub fn sqlite(db: &Database) -> Self {
        Stores {
            catalog: Arc::new(db.products()),
            stock: Arc::new(db.stock()),
            loyalty: Arc::new(db.loyalty()),
            sales: Arc::new(db.sales()),
            journal: Arc::new(db.settlements()),
        }
    }
}

// =============================================================================
// SQLite Implementations
// =============================================================================

#[async_trait]
impl ProductCatalog for ProductRepository {
    async fn find_by_barcode(&self, code: &str) -> StoreResult<Option<Product>> {
        Ok(ProductRepository::find_by_barcode(self, code).await?)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Product>> {
        Ok(ProductRepository::find_by_id(self, id).await?)
    }
}

#[async_trait]
impl StockStore for StockRepository {
    async fn decrement(&self, product_id: &str, quantity: i64, sale_id: &str) -> StoreResult<bool> {
        Ok(StockRepository::decrement(self, product_id, quantity, sale_id).await?)
    }
}

#[async_trait]
impl LoyaltyStore for LoyaltyRepository {
    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<LoyaltyAccount>> {
        Ok(LoyaltyRepository::find_by_phone(self, phone).await?)
    }

    async fn create(&self, phone: &str, display_name: Option<&str>) -> StoreResult<LoyaltyAccount> {
        Ok(LoyaltyRepository::create(self, phone, display_name).await?)
    }

    async fn update_balance(&self, account_id: &str, delta: i64, sale_id: &str) -> StoreResult<bool> {
        Ok(LoyaltyRepository::update_balance(self, account_id, delta, sale_id).await?)
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> StoreResult<bool> {
        Ok(LoyaltyRepository::append_ledger_entry(self, entry).await?)
    }
}

#[async_trait]
impl SaleStore for SaleRepository {
    async fn insert(&self, sale: &SaleRecord) -> StoreResult<String> {
        Ok(SaleRepository::insert(self, sale).await?)
    }

    async fn find_by_attempt(&self, attempt_id: &str) -> StoreResult<Option<SaleRecord>> {
        Ok(SaleRepository::find_by_attempt(self, attempt_id).await?)
    }
}

#[async_trait]
impl SettlementJournal for SettlementRepository {
    async fn begin(&self, entry: &SettlementEntry) -> StoreResult<SettlementEntry> {
        Ok(SettlementRepository::begin(self, entry).await?)
    }

    async fn mark_step(&self, attempt_id: &str, step: SettlementStep) -> StoreResult<()> {
        Ok(SettlementRepository::mark_step(self, attempt_id, step).await?)
    }

    async fn record_failure(&self, attempt_id: &str, error: &str) -> StoreResult<u32> {
        Ok(SettlementRepository::record_failure(self, attempt_id, error).await?)
    }

    async fn flag_for_review(&self, attempt_id: &str) -> StoreResult<()> {
        Ok(SettlementRepository::flag_for_review(self, attempt_id).await?)
    }

    async fn list_incomplete(&self, limit: u32) -> StoreResult<Vec<SettlementEntry>> {
        Ok(SettlementRepository::list_incomplete(self, limit).await?)
    }

    async fn record_unresolved(&self, charge: &UnresolvedCharge) -> StoreResult<bool> {
        Ok(SettlementRepository::record_unresolved(self, charge).await?)
    }

    async fn list_unresolved(&self) -> StoreResult<Vec<UnresolvedCharge>> {
        Ok(SettlementRepository::list_unresolved(self).await?)
    }

    async fn resolve_unresolved(
        &self,
        request_id: &str,
        resolution: ChargeResolution,
        note: Option<&str>,
    ) -> StoreResult<()> {
        Ok(SettlementRepository::resolve_unresolved(self, request_id, resolution, note).await?)
    }
}
