//! # Settlement Reconciler
//!
//! Applies a successful payment to the three record stores as a saga.
//!
//! ## Saga
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  settle(draft, payment)                                                 │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  journal.begin(entry)  ── durable intent, full SaleRecord payload       │
//! │     │                     (replay returns the entry already stored)     │
//! │     ▼                                                                   │
//! │  1. sales.insert           keyed by payment attempt                    │
//! │     │   failure stops here: stock and loyalty wait for the sale         │
//! │     ▼                                                                   │
//! │  2. stock.decrement × line keyed by (sale, product), floored at 0     │
//! │  3. loyalty balance + ledger keyed by sale / (sale, kind)             │
//! │     │   2 and 3 are independent; a failure in one never undoes 1        │
//! │     ▼                                                                   │
//! │  4. compose_receipt        always, even when 2 or 3 are pending        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Step failures are logged at `error`, recorded on the journal entry and
//! picked up later by the `ReconciliationWorker`. The caller never sees a
//! settlement failure as a failed sale.
//!
//! `begin` is retried with a short backoff. If the journal stays down the
//! steps still run; any that fail are journaled once more afterwards, and
//! when even that fails the operator is told to reconcile by hand.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use soko_core::{
    build_sale_record, compose_receipt, BusinessProfile, LedgerEntry, LedgerEntryKind, Receipt,
    SaleDraft, SaleRecord, SettledPayment, SettlementEntry, SettlementStep,
};

use crate::error::StoreResult;
use crate::notify::{Notification, Notifier};
use crate::stores::{LoyaltyStore, SaleStore, SettlementJournal, StockStore, Stores};

/// Tries at opening a journal entry before settling without one.
const JOURNAL_BEGIN_ATTEMPTS: u32 = 3;
const JOURNAL_RETRY_INITIAL: Duration = Duration::from_millis(200);
const JOURNAL_RETRY_MAX: Duration = Duration::from_secs(2);

// =============================================================================
// Outcomes
// =============================================================================

/// Result of settling one payment.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub sale: SaleRecord,
    pub receipt: Receipt,
    /// Steps still to apply; empty when fully settled.
    pub pending_steps: Vec<SettlementStep>,
    /// Failed runs recorded on the journal entry.
    pub attempts: u32,
    /// False when the journal itself was unreachable.
    pub journaled: bool,
}

impl SettlementOutcome {
    pub fn is_complete(&self) -> bool {
        self.pending_steps.is_empty()
    }
}

/// Result of one pass over a journal entry's pending steps.
#[derive(Debug, Clone)]
pub struct StepRun {
    pub entry: SettlementEntry,
    pub failed: Vec<SettlementStep>,
    /// Journal attempt counter after this run.
    pub attempts: u32,
}

impl StepRun {
    pub fn is_complete(&self) -> bool {
        self.entry.is_complete()
    }
}

// =============================================================================
// Settlement Reconciler
// =============================================================================

/// Runs the settlement saga against the record stores.
#[derive(Clone)]
pub struct SettlementReconciler {
    sales: Arc<dyn SaleStore>,
    stock: Arc<dyn StockStore>,
    loyalty: Arc<dyn LoyaltyStore>,
    journal: Arc<dyn SettlementJournal>,
    notifier: Arc<dyn Notifier>,
    profile: BusinessProfile,
}

impl SettlementReconciler {
    pub fn new(stores: &Stores, notifier: Arc<dyn Notifier>, profile: BusinessProfile) -> Self {
        SettlementReconciler {
            sales: Arc::clone(&stores.sales),
            stock: Arc::clone(&stores.stock),
            loyalty: Arc::clone(&stores.loyalty),
            journal: Arc::clone(&stores.journal),
            notifier,
            profile,
        }
    }

    pub fn journal(&self) -> &Arc<dyn SettlementJournal> {
        &self.journal
    }

    /// Settles a successful payment. Safe to call again for the same
    /// attempt: the journal hands back the original sale and every store
    /// write is keyed.
    pub async fn settle(&self, draft: &SaleDraft, payment: &SettledPayment) -> SettlementOutcome {
        let fresh = SettlementEntry::new(build_sale_record(draft, payment, Utc::now()));

        let (entry, journaled) = match self.begin_journal(&fresh).await {
            Ok(entry) => (entry, true),
            Err(e) => {
                error!(
                    attempt_id = %fresh.attempt_id,
                    error = %e,
                    "Settlement journal unavailable, settling without a journal entry"
                );
                (fresh, false)
            }
        };

        if entry.is_complete() {
            info!(
                attempt_id = %entry.attempt_id,
                sale_id = %entry.sale.id,
                "Payment already settled"
            );
        }

        let mut run = self.run_steps(entry, journaled).await;
        let journaled = journaled || (!run.is_complete() && self.journal_late(&mut run).await);

        let receipt = compose_receipt(&run.entry.sale, &self.profile);
        let pending_steps = run.entry.pending_steps();

        if pending_steps.is_empty() {
            info!(
                sale_id = %run.entry.sale.id,
                receipt_number = %run.entry.sale.receipt_number,
                total = %run.entry.sale.total(),
                "Sale settled"
            );
        } else {
            let names: Vec<&str> = pending_steps.iter().map(SettlementStep::as_str).collect();
            let notification = if journaled {
                Notification::settlement_incomplete(&run.entry.sale.receipt_number, &names)
            } else {
                error!(
                    sale_id = %run.entry.sale.id,
                    attempt_id = %run.entry.attempt_id,
                    pending = ?pending_steps,
                    "Incomplete settlement could not be journaled, manual reconciliation needed"
                );
                Notification::settlement_unjournaled(&run.entry.sale.receipt_number, &names)
            };
            self.notifier.notify(notification);
        }

        SettlementOutcome {
            sale: run.entry.sale,
            receipt,
            pending_steps,
            attempts: run.attempts,
            journaled,
        }
    }

    /// Re-runs the pending steps of a journaled entry.
    pub async fn resume(&self, entry: SettlementEntry) -> StepRun {
        debug!(
            attempt_id = %entry.attempt_id,
            pending = ?entry.pending_steps(),
            "Resuming settlement"
        );
        self.run_steps(entry, true).await
    }

    /// Opens the journal entry, backing off between failed tries.
    async fn begin_journal(&self, entry: &SettlementEntry) -> StoreResult<SettlementEntry> {
        let mut backoff = ExponentialBackoff {
            initial_interval: JOURNAL_RETRY_INITIAL,
            max_interval: JOURNAL_RETRY_MAX,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut tries = 0;

        loop {
            tries += 1;
            match self.journal.begin(entry).await {
                Ok(stored) => return Ok(stored),
                Err(e) if tries < JOURNAL_BEGIN_ATTEMPTS => {
                    let delay = backoff.next_backoff().unwrap_or(JOURNAL_RETRY_MAX);
                    warn!(
                        attempt_id = %entry.attempt_id,
                        tries,
                        error = %e,
                        ?delay,
                        "Settlement journal unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Journals a run that started without an entry so the worker can
    /// finish its pending steps. Returns false when the journal is still
    /// unreachable.
    async fn journal_late(&self, run: &mut StepRun) -> bool {
        let mut pending = run.entry.clone();
        pending.attempts = 0;
        pending.last_error = None;

        if let Err(e) = self.begin_journal(&pending).await {
            error!(attempt_id = %pending.attempt_id, error = %e, "Settlement journal still unavailable");
            return false;
        }

        let message = run.entry.last_error.clone().unwrap_or_default();
        match self.journal.record_failure(&run.entry.attempt_id, &message).await {
            Ok(attempts) => {
                run.entry.attempts = attempts;
                run.attempts = attempts;
            }
            Err(e) => warn!(
                attempt_id = %run.entry.attempt_id,
                error = %e,
                "Failed to record settlement failure"
            ),
        }

        info!(
            attempt_id = %run.entry.attempt_id,
            pending = ?run.entry.pending_steps(),
            "Incomplete settlement journaled for retry"
        );
        true
    }

    async fn run_steps(&self, mut entry: SettlementEntry, journaled: bool) -> StepRun {
        let mut failed = Vec::new();
        let mut errors = Vec::new();

        for step in entry.pending_steps() {
            // Stock and loyalty are keyed by the sale id, so they wait for it
            if step != SettlementStep::SalePersisted && !entry.sale_persisted {
                break;
            }

            let result = match step {
                SettlementStep::SalePersisted => self.persist_sale(&mut entry.sale).await,
                SettlementStep::StockApplied => self.apply_stock(&entry.sale).await,
                SettlementStep::LoyaltyApplied => self.apply_loyalty(&entry.sale).await,
            };

            match result {
                Ok(()) => {
                    entry.mark_done(step);
                    if journaled {
                        if let Err(e) = self.journal.mark_step(&entry.attempt_id, step).await {
                            warn!(
                                attempt_id = %entry.attempt_id,
                                step = %step,
                                error = %e,
                                "Failed to journal completed step"
                            );
                        }
                    }
                }
                Err(e) => {
                    error!(
                        sale_id = %entry.sale.id,
                        step = %step,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Settlement step failed"
                    );
                    failed.push(step);
                    errors.push(format!("{}: {}", step, e));
                }
            }
        }

        if !errors.is_empty() {
            let message = errors.join("; ");
            entry.last_error = Some(message.clone());
            entry.attempts += 1;

            if journaled {
                match self.journal.record_failure(&entry.attempt_id, &message).await {
                    Ok(attempts) => entry.attempts = attempts,
                    Err(e) => warn!(
                        attempt_id = %entry.attempt_id,
                        error = %e,
                        "Failed to record settlement failure"
                    ),
                }
            }
        }

        let attempts = entry.attempts;
        StepRun {
            entry,
            failed,
            attempts,
        }
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn persist_sale(&self, sale: &mut SaleRecord) -> StoreResult<()> {
        let stored_id = self.sales.insert(sale).await?;

        if stored_id != sale.id {
            warn!(
                attempt_id = %sale.payment_attempt_id,
                sale_id = %sale.id,
                stored_id = %stored_id,
                "Payment attempt already has a sale, continuing with the stored one"
            );
            if let Some(stored) = self.sales.find_by_attempt(&sale.payment_attempt_id).await? {
                sale.receipt_number = stored.receipt_number;
                sale.created_at = stored.created_at;
            }
            sale.id = stored_id;
        }

        info!(sale_id = %sale.id, receipt_number = %sale.receipt_number, "Sale recorded");
        Ok(())
    }

    /// Decrements every line. Lines are independent; the first error is
    /// returned after all lines were tried.
    async fn apply_stock(&self, sale: &SaleRecord) -> StoreResult<()> {
        let mut first_error = None;

        for line in &sale.lines {
            match self
                .stock
                .decrement(&line.product_id, line.quantity, &sale.id)
                .await
            {
                Ok(true) => debug!(
                    sale_id = %sale.id,
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    "Stock decremented"
                ),
                Ok(false) => debug!(
                    sale_id = %sale.id,
                    product_id = %line.product_id,
                    "Stock already decremented for this sale"
                ),
                Err(e) => {
                    warn!(
                        sale_id = %sale.id,
                        product_id = %line.product_id,
                        error = %e,
                        "Stock decrement failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn apply_loyalty(&self, sale: &SaleRecord) -> StoreResult<()> {
        let Some(account_id) = sale.loyalty_account_id.as_deref() else {
            return Ok(());
        };

        let delta = sale.points_delta();
        let applied = self.loyalty.update_balance(account_id, delta, &sale.id).await?;
        debug!(account_id = %account_id, sale_id = %sale.id, delta, applied, "Points balance");

        self.append_ledger(account_id, sale, LedgerEntryKind::Earn, sale.points_earned)
            .await?;
        if sale.points_redeemed > 0 {
            self.append_ledger(account_id, sale, LedgerEntryKind::Redeem, sale.points_redeemed)
                .await?;
        }

        info!(
            account_id = %account_id,
            sale_id = %sale.id,
            earned = sale.points_earned,
            redeemed = sale.points_redeemed,
            "Loyalty applied"
        );
        Ok(())
    }

    async fn append_ledger(
        &self,
        account_id: &str,
        sale: &SaleRecord,
        kind: LedgerEntryKind,
        points: i64,
    ) -> StoreResult<()> {
        let entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            sale_id: sale.id.clone(),
            kind,
            points,
            created_at: Utc::now(),
        };

        if !self.loyalty.append_ledger_entry(&entry).await? {
            debug!(sale_id = %sale.id, kind = kind.as_str(), "Ledger entry already written");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStores;
    use crate::notify::RecordingNotifier;
    use soko_core::{Cart, Money, PaymentAttempt, PricingPolicy, Product, TaxRate};

    fn soda() -> Product {
        Product {
            id: "p-soda".into(),
            sku: "SODA-500".into(),
            barcode: Some("6001234500012".into()),
            name: "Soda 500ml".into(),
            price_cents: 50_000,
            quantity_available: 10,
        }
    }

    fn profile() -> BusinessProfile {
        BusinessProfile {
            name: "Mama Njeri Shop".into(),
            address: None,
            phone: None,
            tax_pin: None,
            currency: "KES".into(),
            tax_rate: TaxRate::from_bps(1600),
            footer: None,
        }
    }

    fn policy() -> PricingPolicy {
        PricingPolicy {
            tax_registered: true,
            ..PricingPolicy::default()
        }
    }

    async fn setup() -> (MemoryStores, SettlementReconciler, Arc<RecordingNotifier>) {
        let stores = MemoryStores::new();
        stores.add_product(soda()).await;
        let notifier = Arc::new(RecordingNotifier::new());
        let reconciler = SettlementReconciler::new(&stores.stores(), notifier.clone(), profile());
        (stores, reconciler, notifier)
    }

    fn draft(points: i64, account_id: Option<String>) -> SaleDraft {
        let mut cart = Cart::new();
        cart.add_line(&soda()).unwrap();
        cart.add_line(&soda()).unwrap();
        cart.to_draft(points, &policy(), Some("254712345678".into()), account_id)
            .unwrap()
    }

    fn cash_payment(draft: &SaleDraft, tendered: Money) -> SettledPayment {
        let mut attempt = PaymentAttempt::cash(draft.amount_due());
        attempt.settle_cash(tendered).unwrap();
        SettledPayment::from_attempt(&attempt).unwrap()
    }

    #[tokio::test]
    async fn test_settles_loyalty_sale() {
        let (stores, reconciler, _) = setup().await;
        let account = stores.add_account("254712345678", 250).await;

        let draft = draft(200, Some(account.id.clone()));
        assert_eq!(draft.amount_due(), Money::from_major(928));

        let payment = cash_payment(&draft, Money::from_major(1000));
        let outcome = reconciler.settle(&draft, &payment).await;

        assert!(outcome.is_complete());
        assert!(outcome.journaled);
        assert_eq!(outcome.sale.points_earned, 8);
        assert_eq!(outcome.sale.points_redeemed, 200);
        assert_eq!(outcome.receipt.total, Money::from_major(928));
        assert_eq!(outcome.receipt.payment.change, Some(Money::from_major(72)));

        assert_eq!(stores.stock_of("p-soda").await, Some(8));
        let account = stores.account(&account.id).await.unwrap();
        assert_eq!(account.points_balance, 58);
        assert_eq!(account.lifetime_earned, 8);
        assert_eq!(account.lifetime_redeemed, 200);
        assert_eq!(stores.ledger_for_sale(&outcome.sale.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_replay_applies_nothing_twice() {
        let (stores, reconciler, _) = setup().await;
        let account = stores.add_account("254712345678", 250).await;
        let draft = draft(200, Some(account.id.clone()));
        let payment = cash_payment(&draft, Money::from_major(928));

        let first = reconciler.settle(&draft, &payment).await;
        let second = reconciler.settle(&draft, &payment).await;

        assert_eq!(first.sale.id, second.sale.id);
        assert_eq!(first.sale.receipt_number, second.sale.receipt_number);
        assert_eq!(stores.sale_count().await, 1);
        assert_eq!(stores.stock_of("p-soda").await, Some(8));
        assert_eq!(stores.account(&account.id).await.unwrap().points_balance, 58);
        assert_eq!(stores.ledger_for_sale(&first.sale.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_no_account_means_no_ledger() {
        let (stores, reconciler, _) = setup().await;
        let draft = draft(0, None);
        let outcome = reconciler
            .settle(&draft, &cash_payment(&draft, Money::from_major(1160)))
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.sale.total(), Money::from_major(1160));
        assert_eq!(outcome.sale.points_earned, 0);
        assert!(outcome.receipt.loyalty.is_none());
        assert!(stores.ledger_for_sale(&outcome.sale.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_redeem_writes_only_earn_entry() {
        let (stores, reconciler, _) = setup().await;
        let account = stores.add_account("254712345678", 0).await;
        let draft = draft(0, Some(account.id.clone()));
        let outcome = reconciler
            .settle(&draft, &cash_payment(&draft, Money::from_major(1160)))
            .await;

        let ledger = stores.ledger_for_sale(&outcome.sale.id).await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, LedgerEntryKind::Earn);
        assert_eq!(ledger[0].points, 10);
    }

    #[tokio::test]
    async fn test_stock_failure_keeps_sale_and_resumes() {
        let (stores, reconciler, notifier) = setup().await;
        stores.fail_next_stock(1).await;

        let draft = draft(0, None);
        let payment = cash_payment(&draft, Money::from_major(1160));
        let outcome = reconciler.settle(&draft, &payment).await;

        assert!(!outcome.is_complete());
        assert_eq!(outcome.pending_steps, vec![SettlementStep::StockApplied]);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(stores.sale_count().await, 1);
        assert_eq!(stores.stock_of("p-soda").await, Some(10));
        assert!(notifier
            .titles()
            .contains(&"Sale saved, records pending".to_string()));

        let entry = stores.journal_entry(&payment.attempt_id).await.unwrap();
        assert!(entry.last_error.as_deref().unwrap().contains("stock_applied"));

        let run = reconciler.resume(entry).await;
        assert!(run.is_complete());
        assert!(run.failed.is_empty());
        assert_eq!(stores.stock_of("p-soda").await, Some(8));
        assert!(stores
            .journal_entry(&payment.attempt_id)
            .await
            .unwrap()
            .is_complete());
    }

    #[tokio::test]
    async fn test_sale_failure_holds_back_stock_and_loyalty() {
        let (stores, reconciler, _) = setup().await;
        let account = stores.add_account("254712345678", 250).await;
        stores.fail_next_sales(1).await;

        let draft = draft(200, Some(account.id.clone()));
        let outcome = reconciler
            .settle(&draft, &cash_payment(&draft, Money::from_major(928)))
            .await;

        assert_eq!(
            outcome.pending_steps,
            vec![
                SettlementStep::SalePersisted,
                SettlementStep::StockApplied,
                SettlementStep::LoyaltyApplied
            ]
        );
        assert_eq!(stores.sale_count().await, 0);
        assert_eq!(stores.stock_of("p-soda").await, Some(10));
        assert_eq!(stores.account(&account.id).await.unwrap().points_balance, 250);
        // The receipt is still produced for the customer
        assert_eq!(outcome.receipt.total, Money::from_major(928));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_without_journal() {
        let (stores, reconciler, _) = setup().await;
        stores.fail_next_journal(JOURNAL_BEGIN_ATTEMPTS).await;

        let draft = draft(0, None);
        let payment = cash_payment(&draft, Money::from_major(1160));
        let outcome = reconciler.settle(&draft, &payment).await;

        assert!(!outcome.journaled);
        assert!(outcome.is_complete());
        assert!(stores.journal_entry(&payment.attempt_id).await.is_none());

        // A later replay reuses the stored sale, its receipt and its stock keys
        let again = reconciler.settle(&draft, &payment).await;
        assert!(again.journaled);
        assert_eq!(again.sale.id, outcome.sale.id);
        assert_eq!(again.sale.receipt_number, outcome.sale.receipt_number);
        assert_eq!(again.receipt.receipt_number, outcome.sale.receipt_number);
        assert_eq!(stores.stock_of("p-soda").await, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_journal_outage_is_retried_before_settling() {
        let (stores, reconciler, notifier) = setup().await;
        stores.fail_next_journal(1).await;
        stores.fail_next_stock(1).await;

        let draft = draft(0, None);
        let payment = cash_payment(&draft, Money::from_major(1160));
        let outcome = reconciler.settle(&draft, &payment).await;

        assert!(outcome.journaled);
        assert_eq!(outcome.pending_steps, vec![SettlementStep::StockApplied]);
        let entry = stores.journal_entry(&payment.attempt_id).await.unwrap();
        assert_eq!(entry.attempts, 1);
        assert!(notifier
            .titles()
            .contains(&"Sale saved, records pending".to_string()));

        assert!(reconciler.resume(entry).await.is_complete());
        assert_eq!(stores.stock_of("p-soda").await, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_is_journaled_after_outage() {
        let (stores, reconciler, _) = setup().await;
        // Every begin try at the start fails; the journal is back afterwards
        stores.fail_next_journal(JOURNAL_BEGIN_ATTEMPTS).await;
        stores.fail_next_stock(1).await;

        let draft = draft(0, None);
        let payment = cash_payment(&draft, Money::from_major(1160));
        let outcome = reconciler.settle(&draft, &payment).await;

        assert!(outcome.journaled);
        assert_eq!(outcome.pending_steps, vec![SettlementStep::StockApplied]);
        assert_eq!(outcome.attempts, 1);

        let entry = stores.journal_entry(&payment.attempt_id).await.unwrap();
        assert!(entry.sale_persisted);
        assert!(!entry.stock_applied);
        assert_eq!(entry.sale.id, outcome.sale.id);
        assert_eq!(entry.attempts, 1);

        assert!(reconciler.resume(entry).await.is_complete());
        assert_eq!(stores.stock_of("p-soda").await, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unjournaled_failure_asks_for_manual_reconciliation() {
        let (stores, reconciler, notifier) = setup().await;
        stores.fail_next_journal(JOURNAL_BEGIN_ATTEMPTS * 2).await;
        stores.fail_next_stock(1).await;

        let draft = draft(0, None);
        let payment = cash_payment(&draft, Money::from_major(1160));
        let outcome = reconciler.settle(&draft, &payment).await;

        assert!(!outcome.journaled);
        assert_eq!(outcome.pending_steps, vec![SettlementStep::StockApplied]);
        assert_eq!(stores.sale_count().await, 1);

        let titles = notifier.titles();
        assert!(titles.contains(&"Manual reconciliation needed".to_string()));
        assert!(!titles.contains(&"Sale saved, records pending".to_string()));
    }
}
