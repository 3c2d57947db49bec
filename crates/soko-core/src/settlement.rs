//! # Settlement Records
//!
//! Turns a successful payment plus the frozen sale draft into the
//! immutable `SaleRecord`, and tracks which side effects of that sale have
//! been applied.
//!
//! ## Saga Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SettlementEntry (keyed by payment attempt id)                         │
//! │                                                                         │
//! │   payload: full SaleRecord (durable intent)                             │
//! │                                                                         │
//! │   [1] SalePersisted  ──►  [2] StockApplied  ──►  [3] LoyaltyApplied     │
//! │                                                                         │
//! │   Each step is idempotent and keyed by sale id, so a replay after a     │
//! │   crash or a failed step never applies anything twice.                  │
//! │   Step 3 starts out done when no loyalty account is attached.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::payment::{PaymentAttempt, PaymentState, UnresolvedCharge};
use crate::types::{receipt_number, PaymentMethod, SaleDraft, SaleRecord};

// =============================================================================
// Settled Payment
// =============================================================================

/// The payment facts a sale record needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledPayment {
    pub attempt_id: String,
    pub method: PaymentMethod,
    pub settled_amount: Option<Money>,
    pub tendered: Option<Money>,
    pub change: Option<Money>,
    pub external_receipt_ref: Option<String>,
    pub amount_mismatch: bool,
}

impl SettledPayment {
    /// Extracts settlement facts from a successful attempt.
    pub fn from_attempt(attempt: &PaymentAttempt) -> CoreResult<Self> {
        if attempt.state() != PaymentState::Success {
            return Err(CoreError::InvalidPaymentTransition {
                attempt_id: attempt.id().to_string(),
                state: attempt.state(),
                action: "settle",
            });
        }

        Ok(SettledPayment {
            attempt_id: attempt.id().to_string(),
            method: attempt.method(),
            settled_amount: attempt.settled_amount(),
            tendered: attempt.tendered(),
            change: attempt.change(),
            external_receipt_ref: attempt.external_receipt_ref().map(str::to_string),
            amount_mismatch: attempt.amount_mismatch(),
        })
    }

    /// Settlement facts for an unresolved charge the gateway later
    /// confirmed.
    pub fn from_verified_charge(
        charge: &UnresolvedCharge,
        settled_amount: Option<Money>,
        receipt_ref: Option<String>,
        tolerance: Money,
    ) -> Self {
        let settled = settled_amount.unwrap_or(charge.amount);
        let due = charge.draft.amount_due();

        SettledPayment {
            attempt_id: charge.attempt_id.clone(),
            method: PaymentMethod::MobileMoney,
            settled_amount: Some(settled),
            tendered: None,
            change: None,
            external_receipt_ref: receipt_ref,
            amount_mismatch: (settled - due).abs() > tolerance,
        }
    }
}

/// Builds the immutable sale record for a settled payment.
pub fn build_sale_record(
    draft: &SaleDraft,
    payment: &SettledPayment,
    created_at: DateTime<Utc>,
) -> SaleRecord {
    let id = Uuid::new_v4().to_string();
    let totals = &draft.totals;
    let has_account = draft.loyalty_account_id.is_some();

    SaleRecord {
        receipt_number: receipt_number(created_at, &id),
        id,
        payment_attempt_id: payment.attempt_id.clone(),
        lines: draft.lines.clone(),
        subtotal_cents: totals.subtotal.cents(),
        loyalty_discount_cents: totals.loyalty_discount.cents(),
        tax_cents: totals.tax.cents(),
        total_cents: totals.total.cents(),
        payment_method: payment.method,
        amount_tendered_cents: payment.tendered.map(|m| m.cents()),
        change_cents: payment.change.map(|m| m.cents()),
        settled_amount_cents: payment.settled_amount.map(|m| m.cents()),
        amount_mismatch: payment.amount_mismatch,
        customer_phone: draft.customer_phone.clone(),
        loyalty_account_id: draft.loyalty_account_id.clone(),
        // No account, nothing earned or redeemed
        points_earned: if has_account { totals.points_to_earn } else { 0 },
        points_redeemed: if has_account { totals.points_redeemed } else { 0 },
        external_receipt_ref: payment.external_receipt_ref.clone(),
        created_at,
    }
}

// =============================================================================
// Settlement Journal Entry
// =============================================================================

/// One step of the settlement saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStep {
    SalePersisted,
    StockApplied,
    LoyaltyApplied,
}

impl SettlementStep {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SettlementStep::SalePersisted => "sale_persisted",
            SettlementStep::StockApplied => "stock_applied",
            SettlementStep::LoyaltyApplied => "loyalty_applied",
        }
    }
}

impl std::fmt::Display for SettlementStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Journal entry for one successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEntry {
    /// Payment attempt id: one settlement per attempt.
    pub attempt_id: String,
    pub sale: SaleRecord,
    pub sale_persisted: bool,
    pub stock_applied: bool,
    pub loyalty_applied: bool,
    /// Failed settlement runs so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Retry budget exhausted; an operator must reconcile by hand.
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementEntry {
    /// Opens a journal entry with no steps applied.
    pub fn new(sale: SaleRecord) -> Self {
        let now = Utc::now();
        SettlementEntry {
            attempt_id: sale.payment_attempt_id.clone(),
            loyalty_applied: sale.loyalty_account_id.is_none(),
            sale,
            sale_persisted: false,
            stock_applied: false,
            attempts: 0,
            last_error: None,
            needs_review: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_done(&self, step: SettlementStep) -> bool {
        match step {
            SettlementStep::SalePersisted => self.sale_persisted,
            SettlementStep::StockApplied => self.stock_applied,
            SettlementStep::LoyaltyApplied => self.loyalty_applied,
        }
    }

    pub fn mark_done(&mut self, step: SettlementStep) {
        match step {
            SettlementStep::SalePersisted => self.sale_persisted = true,
            SettlementStep::StockApplied => self.stock_applied = true,
            SettlementStep::LoyaltyApplied => self.loyalty_applied = true,
        }
        self.updated_at = Utc::now();
    }

    /// Steps still to apply, in saga order.
    pub fn pending_steps(&self) -> Vec<SettlementStep> {
        [
            SettlementStep::SalePersisted,
            SettlementStep::StockApplied,
            SettlementStep::LoyaltyApplied,
        ]
        .into_iter()
        .filter(|step| !self.is_done(*step))
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.sale_persisted && self.stock_applied && self.loyalty_applied
    }
}
