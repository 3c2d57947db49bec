//! # Checkout Session
//!
//! One till's checkout, from first scan to printed receipt.
//!
//! ## Session Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CheckoutSession                                │
//! │                                                                         │
//! │  on_scan / add_product / adjust_quantity / remove_line                  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  attach_customer(phone) ─► set_redemption(points)      (optional)      │
//! │        │                                                                │
//! │        ├──► pay_cash(tendered) ───────────────┐                        │
//! │        │                                       ▼                        │
//! │        └──► start_mobile_money ─► poller ─► complete_mobile_money       │
//! │                   │ cart frozen                │                        │
//! │                   │                  success ──┤── failed / cancelled   │
//! │                   │                            ▼          │             │
//! │                   │           SettlementReconciler     cart kept,       │
//! │                   │           receipt, cart cleared    timeout ─►       │
//! │                   │                                    unresolved       │
//! │                   ▼                                                     │
//! │  close() while pending ─► poller stopped, charge recorded unresolved   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A session is single-threaded: every operation takes `&mut self`. While a
//! payment is in flight every cart, customer and payment operation is
//! refused with `CheckoutInProgress`.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use soko_core::loyalty::LoyaltyPreview;
use soko_core::validation::validate_barcode;
use soko_core::{
    Cart, CartTotals, ChargeResolution, CoreError, FailureReason, GatewayStatus, LoyaltyAccount, Money,
    OperatorStatus, PaymentAttempt, PaymentState, PricingPolicy, Receipt, SaleDraft, SaleRecord,
    SettledPayment, UnresolvedReason,
};
use soko_db::Database;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::{HttpMobileMoneyGateway, MobileMoneyGateway};
use crate::loyalty::LoyaltyResolver;
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::orchestrator::PaymentOrchestrator;
use crate::poller::PendingPayment;
use crate::reconciler::{SettlementOutcome, SettlementReconciler};
use crate::retry::{ReconciliationWorker, ReconciliationWorkerHandle};
use crate::stores::Stores;

// =============================================================================
// Outcomes
// =============================================================================

/// A settled sale, ready to print.
#[derive(Debug, Clone)]
pub struct CompletedSale {
    pub sale: SaleRecord,
    pub receipt: Receipt,
    pub receipt_text: String,
    pub change: Option<Money>,
    /// All record stores updated; otherwise the worker finishes the rest.
    pub settlement_complete: bool,
    pub amount_mismatch: bool,
}

impl CompletedSale {
    fn new(outcome: SettlementOutcome, receipt_width: usize) -> Self {
        CompletedSale {
            receipt_text: outcome.receipt.render_text(receipt_width),
            change: outcome.sale.change_cents.map(Money::from_cents),
            settlement_complete: outcome.is_complete(),
            amount_mismatch: outcome.sale.amount_mismatch,
            receipt: outcome.receipt,
            sale: outcome.sale,
        }
    }
}

/// How a mobile-money payment ended.
#[derive(Debug, Clone)]
pub enum MobileMoneyOutcome {
    Completed(Box<CompletedSale>),
    Failed {
        attempt: PaymentAttempt,
        reason: String,
        /// The charge may still go through; check before retrying.
        verify_manually: bool,
    },
    Cancelled {
        attempt: PaymentAttempt,
        reason: String,
    },
}

/// Result of `CheckoutService::verify_unresolved`.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    /// Sales settled from charges the gateway confirmed.
    pub settled: Vec<SaleRecord>,
    pub closed: usize,
    pub still_pending: usize,
    pub errors: usize,
}

// =============================================================================
// Checkout Service
// =============================================================================

/// Shared, cloneable wiring for every session on a till.
#[derive(Clone)]
pub struct CheckoutService {
    config: Arc<CheckoutConfig>,
    policy: PricingPolicy,
    stores: Stores,
    loyalty: LoyaltyResolver,
    orchestrator: PaymentOrchestrator,
    reconciler: SettlementReconciler,
    notifier: Arc<dyn Notifier>,
}

impl CheckoutService {
    pub fn new(
        config: CheckoutConfig,
        stores: Stores,
        gateway: Option<Arc<dyn MobileMoneyGateway>>,
        notifier: Arc<dyn Notifier>,
    ) -> CheckoutResult<Self> {
        config.validate()?;

        let policy = config.policy();
        let loyalty = LoyaltyResolver::new(
            Arc::clone(&stores.loyalty),
            policy,
            config.phone.country_code.clone(),
        );
        let orchestrator = PaymentOrchestrator::new(
            gateway,
            config.polling.clone(),
            config.rounding_tolerance(),
            Arc::clone(&notifier),
        );
        let reconciler =
            SettlementReconciler::new(&stores, Arc::clone(&notifier), config.business_profile());

        info!(
            till_id = %config.business.till_id,
            tax_registered = policy.tax_registered,
            mobile_money = orchestrator.mobile_money_enabled(),
            "Checkout service ready"
        );

        Ok(CheckoutService {
            config: Arc::new(config),
            policy,
            stores,
            loyalty,
            orchestrator,
            reconciler,
            notifier,
        })
    }

    /// SQLite stores, the HTTP gateway when one is configured and
    /// log-only notifications.
    pub fn sqlite(db: &Database, config: CheckoutConfig) -> CheckoutResult<Self> {
        let gateway: Option<Arc<dyn MobileMoneyGateway>> = if config.mobile_money_enabled() {
            Some(Arc::new(HttpMobileMoneyGateway::new(
                &config.gateway,
                config.business.till_id.clone(),
            )?))
        } else {
            None
        };

        Self::new(config, Stores::sqlite(db), gateway, Arc::new(TracingNotifier))
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &SettlementReconciler {
        &self.reconciler
    }

    pub fn open_session(&self) -> CheckoutSession {
        CheckoutSession {
            service: self.clone(),
            cart: Cart::new(),
            customer: None,
            customer_phone: None,
            points_to_redeem: 0,
            payment: None,
            closed: false,
        }
    }

    /// Starts the background retry of incomplete settlements.
    pub fn spawn_reconciliation_worker(&self) -> (ReconciliationWorkerHandle, JoinHandle<()>) {
        ReconciliationWorker::spawn(
            self.reconciler.clone(),
            self.config.reconciliation.clone(),
            Arc::clone(&self.notifier),
        )
    }

    /// Asks the gateway once about every open unresolved charge.
    ///
    /// Confirmed charges are settled from their stored draft; cancelled or
    /// failed ones are closed; pending ones stay open.
    pub async fn verify_unresolved(&self) -> CheckoutResult<VerificationReport> {
        let gateway = self
            .orchestrator
            .gateway()
            .cloned()
            .ok_or(CheckoutError::GatewayNotConfigured)?;
        let journal = &self.stores.journal;

        let mut report = VerificationReport::default();

        for charge in journal.list_unresolved().await? {
            let status = match gateway.query_status(&charge.request_id, charge.amount).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(request_id = %charge.request_id, error = %e, "Could not verify charge");
                    report.errors += 1;
                    continue;
                }
            };

            match status {
                GatewayStatus::Pending => {
                    debug!(request_id = %charge.request_id, "Charge still pending");
                    report.still_pending += 1;
                }
                GatewayStatus::Success {
                    settled_amount,
                    receipt_ref,
                } => {
                    let payment = SettledPayment::from_verified_charge(
                        &charge,
                        settled_amount,
                        receipt_ref,
                        self.orchestrator.tolerance(),
                    );
                    let outcome = self.reconciler.settle(&charge.draft, &payment).await;

                    info!(
                        request_id = %charge.request_id,
                        sale_id = %outcome.sale.id,
                        "Unresolved charge confirmed, sale settled"
                    );
                    journal
                        .resolve_unresolved(
                            &charge.request_id,
                            ChargeResolution::Settled,
                            Some(&outcome.sale.receipt_number),
                        )
                        .await?;
                    report.settled.push(outcome.sale);
                }
                GatewayStatus::Cancelled { message } => {
                    let note = message.unwrap_or_else(|| "cancelled".to_string());
                    info!(request_id = %charge.request_id, note = %note, "Unresolved charge closed");
                    journal
                        .resolve_unresolved(&charge.request_id, ChargeResolution::Closed, Some(&note))
                        .await?;
                    report.closed += 1;
                }
                GatewayStatus::Failed { message } => {
                    info!(request_id = %charge.request_id, note = %message, "Unresolved charge closed");
                    journal
                        .resolve_unresolved(&charge.request_id, ChargeResolution::Closed, Some(&message))
                        .await?;
                    report.closed += 1;
                }
            }
        }

        Ok(report)
    }
}

// =============================================================================
// Checkout Session
// =============================================================================

struct ActivePayment {
    pending: PendingPayment,
    draft: SaleDraft,
}

/// A single checkout on a till.
pub struct CheckoutSession {
    service: CheckoutService,
    cart: Cart,
    customer: Option<LoyaltyAccount>,
    /// Normalized; also used for mobile money when no phone is given.
    customer_phone: Option<String>,
    points_to_redeem: i64,
    payment: Option<ActivePayment>,
    closed: bool,
}

impl CheckoutSession {
    // =========================================================================
    // Guards
    // =========================================================================

    fn ensure_open(&self) -> CheckoutResult<()> {
        if self.closed {
            return Err(CheckoutError::SessionClosed);
        }
        Ok(())
    }

    fn ensure_idle(&self) -> CheckoutResult<()> {
        self.ensure_open()?;
        if self.payment.is_some() {
            return Err(CheckoutError::CheckoutInProgress);
        }
        Ok(())
    }

    // =========================================================================
    // Cart
    // =========================================================================

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    /// Adds the product behind a decoded barcode.
    pub async fn on_scan(&mut self, code: &str) -> CheckoutResult<()> {
        self.ensure_idle()?;
        let code = validate_barcode(code)?;

        let product = self
            .service
            .stores
            .catalog
            .find_by_barcode(&code)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(code.clone()))?;

        self.cart.add_line(&product)?;
        debug!(barcode = %code, product_id = %product.id, "Scanned into cart");
        Ok(())
    }

    /// Adds one unit of a product picked by id.
    pub async fn add_product(&mut self, product_id: &str) -> CheckoutResult<()> {
        self.ensure_idle()?;

        let product = self
            .service
            .stores
            .catalog
            .find_by_id(product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

        self.cart.add_line(&product)?;
        Ok(())
    }

    pub fn adjust_quantity(&mut self, product_id: &str, delta: i64) -> CheckoutResult<()> {
        self.ensure_idle()?;
        Ok(self.cart.adjust_quantity(product_id, delta)?)
    }

    pub fn remove_line(&mut self, product_id: &str) -> CheckoutResult<()> {
        self.ensure_idle()?;
        Ok(self.cart.remove_line(product_id)?)
    }

    pub fn clear(&mut self) -> CheckoutResult<()> {
        self.ensure_idle()?;
        self.cart.clear();
        Ok(())
    }

    /// Current totals with the requested redemption.
    pub fn totals(&self) -> CartTotals {
        self.cart.totals(self.redemption(), &self.service.policy)
    }

    fn redemption(&self) -> i64 {
        if self.customer.is_some() {
            self.points_to_redeem
        } else {
            0
        }
    }

    // =========================================================================
    // Customer and Loyalty
    // =========================================================================

    pub fn customer(&self) -> Option<&LoyaltyAccount> {
        self.customer.as_ref()
    }

    /// Attaches a customer by phone. The phone is kept for mobile money
    /// even when no loyalty account exists.
    pub async fn attach_customer(&mut self, raw_phone: &str) -> CheckoutResult<Option<LoyaltyAccount>> {
        self.ensure_idle()?;
        let phone = self.service.loyalty.normalize(raw_phone)?;
        let account = self.service.loyalty.find_by_phone(&phone).await?;

        self.customer_phone = Some(phone);
        self.customer = account.clone();
        self.points_to_redeem = 0;
        Ok(account)
    }

    /// Registers the customer for loyalty and attaches the account.
    pub async fn create_customer(
        &mut self,
        raw_phone: &str,
        display_name: Option<&str>,
    ) -> CheckoutResult<LoyaltyAccount> {
        self.ensure_idle()?;
        let account = self.service.loyalty.create(raw_phone, display_name).await?;

        self.customer_phone = Some(account.phone.clone());
        self.customer = Some(account.clone());
        self.points_to_redeem = 0;
        Ok(account)
    }

    pub fn detach_customer(&mut self) -> CheckoutResult<()> {
        self.ensure_idle()?;
        self.customer = None;
        self.customer_phone = None;
        self.points_to_redeem = 0;
        Ok(())
    }

    /// Requests a points redemption for this sale.
    pub fn set_redemption(&mut self, points: i64) -> CheckoutResult<()> {
        self.ensure_idle()?;
        let account = self
            .customer
            .as_ref()
            .ok_or(CheckoutError::NoLoyaltyAccount)?;

        self.service
            .loyalty
            .validate_redemption(points, account, self.cart.subtotal())?;
        self.points_to_redeem = points;
        Ok(())
    }

    pub fn loyalty_preview(&self) -> Option<LoyaltyPreview> {
        let account = self.customer.as_ref()?;
        Some(self.service.loyalty.preview(&self.totals(), account))
    }

    /// Freezes the cart for payment. The redemption is checked again since
    /// the cart may have shrunk after it was set.
    fn draft(&self) -> CheckoutResult<SaleDraft> {
        if let Some(account) = &self.customer {
            self.service.loyalty.validate_redemption(
                self.points_to_redeem,
                account,
                self.cart.subtotal(),
            )?;
        }

        Ok(self.cart.to_draft(
            self.redemption(),
            &self.service.policy,
            self.customer_phone.clone(),
            self.customer.as_ref().map(|a| a.id.clone()),
        )?)
    }

    fn reset(&mut self) {
        self.cart.clear();
        self.customer = None;
        self.customer_phone = None;
        self.points_to_redeem = 0;
        self.payment = None;
    }

    // =========================================================================
    // Cash
    // =========================================================================

    /// Takes cash and settles the sale.
    pub async fn pay_cash(&mut self, tendered: Money) -> CheckoutResult<CompletedSale> {
        self.ensure_idle()?;
        let draft = self.draft()?;

        let attempt = self
            .service
            .orchestrator
            .pay_cash(draft.amount_due(), tendered)?;
        let payment = SettledPayment::from_attempt(&attempt)?;

        let outcome = self.service.reconciler.settle(&draft, &payment).await;
        self.reset();

        Ok(CompletedSale::new(outcome, self.service.config.business.receipt_width))
    }

    // =========================================================================
    // Mobile Money
    // =========================================================================

    /// Sends a push payment to `phone`, or to the attached customer's phone.
    ///
    /// Returns the attempt as first published. An issuance failure comes
    /// back as a `Failed` attempt and leaves the session idle.
    pub async fn start_mobile_money(&mut self, phone: Option<&str>) -> CheckoutResult<PaymentAttempt> {
        self.ensure_idle()?;

        let phone = match phone {
            Some(raw) => self.service.loyalty.normalize(raw)?,
            None => self
                .customer_phone
                .clone()
                .ok_or(CheckoutError::PhoneRequired)?,
        };
        let draft = self.draft()?;

        let pending = self
            .service
            .orchestrator
            .start_mobile_money(draft.amount_due(), phone)
            .await?;
        let snapshot = pending.snapshot();

        if !snapshot.is_terminal() {
            self.payment = Some(ActivePayment { pending, draft });
        }
        Ok(snapshot)
    }

    /// Latest snapshot of the payment in flight.
    pub fn payment_snapshot(&self) -> Option<PaymentAttempt> {
        self.payment.as_ref().map(|p| p.pending.snapshot())
    }

    /// What the operator should see for the payment in flight.
    pub fn payment_status(&self) -> Option<OperatorStatus> {
        self.payment_snapshot().map(|a| a.operator_status())
    }

    pub fn subscribe_payment(&self) -> Option<watch::Receiver<PaymentAttempt>> {
        self.payment.as_ref().map(|p| p.pending.handle().subscribe())
    }

    /// Asks the poller to query the gateway now.
    pub async fn poll_now(&self) -> CheckoutResult<()> {
        self.ensure_open()?;
        let active = self
            .payment
            .as_ref()
            .ok_or(CheckoutError::NoPaymentInProgress)?;
        active.pending.handle().poll_now().await;
        Ok(())
    }

    /// Waits for the payment in flight to finish, then settles or reports it.
    pub async fn complete_mobile_money(&mut self) -> CheckoutResult<MobileMoneyOutcome> {
        self.ensure_open()?;
        let active = self
            .payment
            .as_ref()
            .ok_or(CheckoutError::NoPaymentInProgress)?;

        active.pending.wait_terminal().await?;
        self.finish_payment().await
    }

    /// Like `complete_mobile_money` but returns `None` while still pending.
    pub async fn try_complete_mobile_money(&mut self) -> CheckoutResult<Option<MobileMoneyOutcome>> {
        self.ensure_open()?;
        let active = self
            .payment
            .as_ref()
            .ok_or(CheckoutError::NoPaymentInProgress)?;

        if !active.pending.snapshot().is_terminal() {
            return Ok(None);
        }
        self.finish_payment().await.map(Some)
    }

    async fn finish_payment(&mut self) -> CheckoutResult<MobileMoneyOutcome> {
        let active = self
            .payment
            .take()
            .ok_or(CheckoutError::NoPaymentInProgress)?;
        let attempt = active.pending.stop().await;

        match attempt.state() {
            PaymentState::Success => {
                let payment = SettledPayment::from_attempt(&attempt)?;
                let outcome = self.service.reconciler.settle(&active.draft, &payment).await;
                self.reset();

                Ok(MobileMoneyOutcome::Completed(Box::new(CompletedSale::new(
                    outcome,
                    self.service.config.business.receipt_width,
                ))))
            }
            PaymentState::Cancelled => Ok(MobileMoneyOutcome::Cancelled {
                reason: failure_text(&attempt),
                attempt,
            }),
            PaymentState::Failed => {
                if matches!(attempt.failure(), Some(FailureReason::Timeout { .. })) {
                    self.record_unresolved(&attempt, active.draft, UnresolvedReason::PollBudgetExhausted)
                        .await;
                }
                Ok(MobileMoneyOutcome::Failed {
                    reason: failure_text(&attempt),
                    verify_manually: attempt.needs_manual_verification(),
                    attempt,
                })
            }
            PaymentState::Idle | PaymentState::Pending => {
                // stop() only returns early states when the poller was killed
                error!(attempt_id = %attempt.id(), "Payment poller stopped before a result");
                self.record_unresolved(&attempt, active.draft, UnresolvedReason::SessionClosed)
                    .await;
                Err(CheckoutError::PollerStopped)
            }
        }
    }

    async fn record_unresolved(&self, attempt: &PaymentAttempt, draft: SaleDraft, reason: UnresolvedReason) {
        let Some(charge) = attempt.unresolved_charge(draft, reason) else {
            return;
        };

        warn!(
            request_id = %charge.request_id,
            attempt_id = %charge.attempt_id,
            amount = %charge.amount,
            reason = reason.as_str(),
            "Recording unresolved mobile-money charge"
        );

        if let Err(e) = self.service.stores.journal.record_unresolved(&charge).await {
            error!(request_id = %charge.request_id, error = %e, "Failed to record unresolved charge");
        }
        self.service
            .notifier
            .notify(Notification::unresolved_charge(&charge));
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Ends the session and stops any poller.
    ///
    /// A payment still pending is not assumed cancelled: it is recorded as
    /// an unresolved charge. A payment that already finished is completed
    /// as usual and its outcome returned.
    pub async fn close(&mut self) -> CheckoutResult<Option<MobileMoneyOutcome>> {
        self.ensure_open()?;

        let outcome = match self.payment.take() {
            None => None,
            Some(active) => {
                let attempt = active.pending.stop().await;
                if attempt.is_terminal() {
                    self.payment = Some(ActivePayment {
                        pending: PendingPayment::finished(attempt),
                        draft: active.draft,
                    });
                    Some(self.finish_payment().await?)
                } else {
                    self.record_unresolved(&attempt, active.draft, UnresolvedReason::SessionClosed)
                        .await;
                    None
                }
            }
        };

        self.closed = true;
        info!(items = self.cart.item_count(), "Checkout session closed");
        Ok(outcome)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn failure_text(attempt: &PaymentAttempt) -> String {
    attempt
        .failure()
        .map(ToString::to_string)
        .unwrap_or_else(|| attempt.state().to_string())
}
