//! # In-Process Stores and Gateway
//!
//! `MemoryStores` keeps every record store in one locked map set with the
//! same replay keys as the SQLite schema. `ScriptedGateway` answers push
//! requests from a queue of canned responses. Both count calls and can be
//! told to fail, which is what the orchestrator and reconciler tests lean on.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use soko_core::{
    ChargeResolution, GatewayStatus, LedgerEntry, LedgerEntryKind, LoyaltyAccount, Money,
    Product, SaleRecord, SettlementEntry, SettlementStep, UnresolvedCharge,
};

use crate::error::{GatewayError, GatewayResult, StoreError, StoreResult};
use crate::gateway::{MobileMoneyGateway, PushRequest};
use crate::stores::{
    LoyaltyStore, ProductCatalog, SaleStore, SettlementJournal, StockStore, Stores,
};

// =============================================================================
// Memory Stores
// =============================================================================

#[derive(Debug, Default)]
struct Faults {
    stock: u32,
    loyalty: u32,
    sales: u32,
    journal: u32,
}

/// Takes one injected failure off `counter`, if any are left.
fn inject(counter: &mut u32, store: &str) -> StoreResult<()> {
    if *counter > 0 {
        *counter -= 1;
        return Err(StoreError::Unavailable(format!("{} offline", store)));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<String, Product>,
    stock_movements: HashSet<(String, String)>,
    accounts: HashMap<String, LoyaltyAccount>,
    balance_applications: HashSet<String>,
    ledger: Vec<LedgerEntry>,
    /// Keyed by payment attempt.
    sales: HashMap<String, SaleRecord>,
    journal: HashMap<String, SettlementEntry>,
    unresolved: HashMap<String, (UnresolvedCharge, Option<ChargeResolution>)>,
    faults: Faults,
}

/// Every store trait over shared in-memory state. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStores {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `Stores` bundle where every seam points at this state.
    pub fn stores(&self) -> Stores {
        Stores {
            catalog: Arc::new(self.clone()),
            stock: Arc::new(self.clone()),
            loyalty: Arc::new(self.clone()),
            sales: Arc::new(self.clone()),
            journal: Arc::new(self.clone()),
        }
    }

    pub async fn add_product(&self, product: Product) {
        let mut state = self.state.lock().await;
        state.products.insert(product.id.clone(), product);
    }

    /// Current stock for a product.
    pub async fn stock_of(&self, product_id: &str) -> Option<i64> {
        let state = self.state.lock().await;
        state.products.get(product_id).map(|p| p.quantity_available)
    }

    /// Registers a member with a starting balance.
    pub async fn add_account(&self, phone: &str, points_balance: i64) -> LoyaltyAccount {
        let account = LoyaltyAccount {
            id: Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            display_name: None,
            points_balance,
            lifetime_earned: 0,
            lifetime_redeemed: 0,
            created_at: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.accounts.insert(account.id.clone(), account.clone());
        account
    }

    pub async fn account(&self, account_id: &str) -> Option<LoyaltyAccount> {
        self.state.lock().await.accounts.get(account_id).cloned()
    }

    pub async fn ledger_for_sale(&self, sale_id: &str) -> Vec<LedgerEntry> {
        let state = self.state.lock().await;
        state
            .ledger
            .iter()
            .filter(|e| e.sale_id == sale_id)
            .cloned()
            .collect()
    }

    pub async fn sale_count(&self) -> usize {
        self.state.lock().await.sales.len()
    }

    pub async fn sale_for_attempt(&self, attempt_id: &str) -> Option<SaleRecord> {
        self.state.lock().await.sales.get(attempt_id).cloned()
    }

    pub async fn journal_entry(&self, attempt_id: &str) -> Option<SettlementEntry> {
        self.state.lock().await.journal.get(attempt_id).cloned()
    }

    /// Resolution of an unresolved charge; `Some(None)` while still open.
    pub async fn charge_resolution(&self, request_id: &str) -> Option<Option<ChargeResolution>> {
        let state = self.state.lock().await;
        state.unresolved.get(request_id).map(|(_, r)| *r)
    }

    pub async fn fail_next_stock(&self, times: u32) {
        self.state.lock().await.faults.stock = times;
    }

    pub async fn fail_next_loyalty(&self, times: u32) {
        self.state.lock().await.faults.loyalty = times;
    }

    pub async fn fail_next_sales(&self, times: u32) {
        self.state.lock().await.faults.sales = times;
    }

    pub async fn fail_next_journal(&self, times: u32) {
        self.state.lock().await.faults.journal = times;
    }
}

#[async_trait]
impl ProductCatalog for MemoryStores {
    async fn find_by_barcode(&self, code: &str) -> StoreResult<Option<Product>> {
        let state = self.state.lock().await;
        Ok(state
            .products
            .values()
            .find(|p| p.barcode.as_deref() == Some(code))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Product>> {
        Ok(self.state.lock().await.products.get(id).cloned())
    }
}

#[async_trait]
impl StockStore for MemoryStores {
    async fn decrement(&self, product_id: &str, quantity: i64, sale_id: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        inject(&mut state.faults.stock, "stock")?;

        if !state.products.contains_key(product_id) {
            return Err(StoreError::NotFound {
                entity: "Stock level".into(),
                id: product_id.into(),
            });
        }
        if !state
            .stock_movements
            .insert((sale_id.to_string(), product_id.to_string()))
        {
            return Ok(false);
        }

        if let Some(product) = state.products.get_mut(product_id) {
            product.quantity_available = (product.quantity_available - quantity).max(0);
        }
        Ok(true)
    }
}

#[async_trait]
impl LoyaltyStore for MemoryStores {
    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<LoyaltyAccount>> {
        let state = self.state.lock().await;
        Ok(state.accounts.values().find(|a| a.phone == phone).cloned())
    }

    async fn create(&self, phone: &str, display_name: Option<&str>) -> StoreResult<LoyaltyAccount> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.accounts.values().find(|a| a.phone == phone) {
            return Ok(existing.clone());
        }

        let account = LoyaltyAccount {
            id: Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            display_name: display_name.map(str::to_string),
            points_balance: 0,
            lifetime_earned: 0,
            lifetime_redeemed: 0,
            created_at: Utc::now(),
        };
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn update_balance(&self, account_id: &str, delta: i64, sale_id: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        inject(&mut state.faults.loyalty, "loyalty")?;

        if !state.accounts.contains_key(account_id) {
            return Err(StoreError::NotFound {
                entity: "Loyalty account".into(),
                id: account_id.into(),
            });
        }
        if !state.balance_applications.insert(sale_id.to_string()) {
            return Ok(false);
        }

        if let Some(account) = state.accounts.get_mut(account_id) {
            account.points_balance = (account.points_balance + delta).max(0);
        }
        Ok(true)
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        inject(&mut state.faults.loyalty, "loyalty")?;

        let exists = state
            .ledger
            .iter()
            .any(|e| e.sale_id == entry.sale_id && e.kind == entry.kind);
        if exists {
            return Ok(false);
        }

        if let Some(account) = state.accounts.get_mut(&entry.account_id) {
            match entry.kind {
                LedgerEntryKind::Earn => account.lifetime_earned += entry.points,
                LedgerEntryKind::Redeem => account.lifetime_redeemed += entry.points,
            }
        }
        state.ledger.push(entry.clone());
        Ok(true)
    }
}

#[async_trait]
impl SaleStore for MemoryStores {
    async fn insert(&self, sale: &SaleRecord) -> StoreResult<String> {
        let mut state = self.state.lock().await;
        inject(&mut state.faults.sales, "sales")?;

        let stored = state
            .sales
            .entry(sale.payment_attempt_id.clone())
            .or_insert_with(|| sale.clone());
        Ok(stored.id.clone())
    }

    async fn find_by_attempt(&self, attempt_id: &str) -> StoreResult<Option<SaleRecord>> {
        let mut state = self.state.lock().await;
        inject(&mut state.faults.sales, "sales")?;
        Ok(state.sales.get(attempt_id).cloned())
    }
}

impl MemoryState {
    fn entry_mut(&mut self, attempt_id: &str) -> StoreResult<&mut SettlementEntry> {
        self.journal
            .get_mut(attempt_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "Settlement".into(),
                id: attempt_id.into(),
            })
    }
}

#[async_trait]
impl SettlementJournal for MemoryStores {
    async fn begin(&self, entry: &SettlementEntry) -> StoreResult<SettlementEntry> {
        let mut state = self.state.lock().await;
        inject(&mut state.faults.journal, "journal")?;

        let stored = state
            .journal
            .entry(entry.attempt_id.clone())
            .or_insert_with(|| entry.clone());
        Ok(stored.clone())
    }

    async fn mark_step(&self, attempt_id: &str, step: SettlementStep) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(attempt_id)?;
        entry.mark_done(step);
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn record_failure(&self, attempt_id: &str, error: &str) -> StoreResult<u32> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(attempt_id)?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(entry.attempts)
    }

    async fn flag_for_review(&self, attempt_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.entry_mut(attempt_id)?.needs_review = true;
        Ok(())
    }

    async fn list_incomplete(&self, limit: u32) -> StoreResult<Vec<SettlementEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<SettlementEntry> = state
            .journal
            .values()
            .filter(|e| !e.needs_review && !e.is_complete())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn record_unresolved(&self, charge: &UnresolvedCharge) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        inject(&mut state.faults.journal, "journal")?;

        if state.unresolved.contains_key(&charge.request_id) {
            return Ok(false);
        }
        state
            .unresolved
            .insert(charge.request_id.clone(), (charge.clone(), None));
        Ok(true)
    }

    async fn list_unresolved(&self) -> StoreResult<Vec<UnresolvedCharge>> {
        let state = self.state.lock().await;
        let mut open: Vec<UnresolvedCharge> = state
            .unresolved
            .values()
            .filter(|(_, resolution)| resolution.is_none())
            .map(|(charge, _)| charge.clone())
            .collect();
        open.sort_by_key(|c| c.created_at);
        Ok(open)
    }

    async fn resolve_unresolved(
        &self,
        request_id: &str,
        resolution: ChargeResolution,
        _note: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match state.unresolved.get_mut(request_id) {
            Some((_, slot)) => {
                *slot = Some(resolution);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "Unresolved charge".into(),
                id: request_id.into(),
            }),
        }
    }
}

// =============================================================================
// Scripted Gateway
// =============================================================================

#[derive(Debug, Default)]
struct Script {
    initiate: VecDeque<GatewayResult<PushRequest>>,
    statuses: VecDeque<GatewayResult<GatewayStatus>>,
}

/// A gateway that replays queued responses.
///
/// `initiate` falls back to a fresh request id when nothing is queued;
/// `query_status` falls back to `Pending`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGateway {
    script: Arc<std::sync::Mutex<Script>>,
    initiate_calls: Arc<AtomicU32>,
    query_calls: Arc<AtomicU32>,
    last_amount: Arc<std::sync::Mutex<Option<Money>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_initiate(&self, result: GatewayResult<PushRequest>) -> &Self {
        self.script().initiate.push_back(result);
        self
    }

    pub fn push_status(&self, result: GatewayResult<GatewayStatus>) -> &Self {
        self.script().statuses.push_back(result);
        self
    }

    /// Queues `n` pending answers.
    pub fn push_pending(&self, n: usize) -> &Self {
        for _ in 0..n {
            self.push_status(Ok(GatewayStatus::Pending));
        }
        self
    }

    pub fn push_success(&self, settled_amount: Option<Money>, receipt_ref: &str) -> &Self {
        self.push_status(Ok(GatewayStatus::Success {
            settled_amount,
            receipt_ref: Some(receipt_ref.to_string()),
        }))
    }

    pub fn initiate_calls(&self) -> u32 {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Amount sent with the last push request.
    pub fn last_amount(&self) -> Option<Money> {
        *self
            .last_amount
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MobileMoneyGateway for ScriptedGateway {
    async fn initiate(
        &self,
        _phone: &str,
        amount: Money,
        _reference: &str,
    ) -> GatewayResult<PushRequest> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_amount
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(amount);

        let queued = self.script().initiate.pop_front();
        queued.unwrap_or_else(|| {
            Ok(PushRequest {
                request_id: format!("ws_CO_{}", Uuid::new_v4().simple()),
            })
        })
    }

    async fn query_status(
        &self,
        _request_id: &str,
        _expected_amount: Money,
    ) -> GatewayResult<GatewayStatus> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.script().statuses.pop_front();
        queued.unwrap_or(Ok(GatewayStatus::Pending))
    }
}

/// A gateway error that the poller treats as transient.
pub fn transient_error() -> GatewayError {
    GatewayError::Transport("connection reset by peer".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use soko_core::{CartTotals, SaleDraft, UnresolvedReason};

    fn product(id: &str, stock: i64) -> Product {
        Product {
            id: id.into(),
            sku: format!("SKU-{}", id),
            barcode: Some(format!("600{}", id)),
            name: format!("Item {}", id),
            price_cents: 50_000,
            quantity_available: stock,
        }
    }

    #[tokio::test]
    async fn test_stock_decrement_is_keyed_by_sale() {
        let stores = MemoryStores::new();
        stores.add_product(product("p1", 5)).await;

        assert!(stores.decrement("p1", 2, "sale-1").await.unwrap());
        assert!(!stores.decrement("p1", 2, "sale-1").await.unwrap());
        assert!(stores.decrement("p1", 9, "sale-2").await.unwrap());
        assert_eq!(stores.stock_of("p1").await, Some(0));
    }

    #[tokio::test]
    async fn test_injected_faults_run_out() {
        let stores = MemoryStores::new();
        stores.add_product(product("p1", 5)).await;
        stores.fail_next_stock(1).await;

        let err = stores.decrement("p1", 1, "sale-1").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(stores.decrement("p1", 1, "sale-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unresolved_charges_close_out() {
        let stores = MemoryStores::new();
        let charge = UnresolvedCharge {
            request_id: "ws_CO_1".into(),
            attempt_id: "att-1".into(),
            amount: Money::from_major(929),
            phone: "254712345678".into(),
            draft: SaleDraft {
                lines: vec![],
                totals: CartTotals::empty(),
                customer_phone: None,
                loyalty_account_id: None,
            },
            reason: UnresolvedReason::SessionClosed,
            created_at: Utc::now(),
        };

        assert!(stores.record_unresolved(&charge).await.unwrap());
        assert!(!stores.record_unresolved(&charge).await.unwrap());
        assert_eq!(stores.list_unresolved().await.unwrap().len(), 1);

        stores
            .resolve_unresolved("ws_CO_1", ChargeResolution::Closed, None)
            .await
            .unwrap();
        assert!(stores.list_unresolved().await.unwrap().is_empty());
        assert_eq!(
            stores.charge_resolution("ws_CO_1").await,
            Some(Some(ChargeResolution::Closed))
        );
    }

    #[tokio::test]
    async fn test_scripted_gateway_replays_in_order() {
        let gateway = ScriptedGateway::new();
        gateway.push_pending(1).push_success(None, "QGH7XK2L");

        let request = gateway
            .initiate("254712345678", Money::from_major(929), "att-1")
            .await
            .unwrap();
        assert!(request.request_id.starts_with("ws_CO_"));
        assert_eq!(gateway.last_amount(), Some(Money::from_major(929)));

        let amount = Money::from_major(929);
        assert_eq!(
            gateway.query_status(&request.request_id, amount).await.unwrap(),
            GatewayStatus::Pending
        );
        assert!(matches!(
            gateway.query_status(&request.request_id, amount).await.unwrap(),
            GatewayStatus::Success { .. }
        ));
        // Script exhausted
        assert_eq!(
            gateway.query_status(&request.request_id, amount).await.unwrap(),
            GatewayStatus::Pending
        );
        assert_eq!(gateway.query_calls(), 3);
    }
}
