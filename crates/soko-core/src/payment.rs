//! # Payment State Machine
//!
//! Pure state machine for one payment attempt. No I/O: the async driver in
//! `soko-checkout` feeds it gateway observations and publishes snapshots.
//!
//! ## States
//! ```text
//!                 settle_cash (tendered ≥ due)
//!        ┌──────────────────────────────────────────────┐
//!        │                                              ▼
//!   ┌────────┐  mark_issued  ┌─────────┐  poll: success  ┌─────────┐
//!   │  Idle  │──────────────►│ Pending │────────────────►│ Success │
//!   └────────┘               └─────────┘                 └─────────┘
//!        │                    │  │   │ poll: pending / transient
//!        │ mark_issuance_     │  │   └──► poll_count += 1 (stays Pending)
//!        │ failed             │  │
//!        │                    │  └── poll: cancelled ──►┌───────────┐
//!        │                    │                         │ Cancelled │
//!        ▼                    ▼                         └───────────┘
//!   ┌────────────────────────────┐
//!   │           Failed           │◄── poll: failed, or budget exhausted
//!   └────────────────────────────┘     (Timeout: verify manually)
//! ```
//!
//! Terminal states never transition. Polls applied to a terminal attempt
//! are no-ops; retrying needs a fresh `PaymentAttempt`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{PaymentMethod, SaleDraft};

// =============================================================================
// Payment State
// =============================================================================

/// Where a payment attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Idle,
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl PaymentState {
    /// Terminal states accept no further transitions.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Success | PaymentState::Failed | PaymentState::Cancelled
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Idle => "idle",
            PaymentState::Pending => "pending",
            PaymentState::Success => "success",
            PaymentState::Failed => "failed",
            PaymentState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Gateway Observations
// =============================================================================

/// A status report from the mobile-money gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Success {
        /// Missing means the gateway settled the amount it was asked for.
        settled_amount: Option<Money>,
        receipt_ref: Option<String>,
    },
    Cancelled {
        message: Option<String>,
    },
    Failed {
        message: String,
    },
}

/// One poll result as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollObservation {
    /// The gateway answered.
    Status(GatewayStatus),
    /// The status query itself failed (network, 5xx, bad body).
    TransientError(String),
}

/// Why an attempt ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The push request could not be sent.
    IssuanceFailed { message: String },
    /// The gateway reported an explicit failure.
    Declined { message: String },
    /// The customer declined or the prompt expired on the device.
    Cancelled { message: Option<String> },
    /// The poll budget ran out with the charge still open.
    Timeout { polls: u32 },
}

impl FailureReason {
    /// The charge may still settle out-of-band.
    pub const fn verify_manually(&self) -> bool {
        matches!(self, FailureReason::Timeout { .. })
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::IssuanceFailed { message } => {
                write!(f, "Payment request could not be sent: {}", message)
            }
            FailureReason::Declined { message } => write!(f, "Payment failed: {}", message),
            FailureReason::Cancelled { message: Some(m) } => {
                write!(f, "Payment cancelled: {}", m)
            }
            FailureReason::Cancelled { message: None } => {
                f.write_str("Payment cancelled by customer")
            }
            FailureReason::Timeout { polls } => write!(
                f,
                "No confirmation after {} checks. Verify the payment manually",
                polls
            ),
        }
    }
}

/// State change produced by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PaymentState,
    pub to: PaymentState,
}

impl Transition {
    /// True when the state actually changed.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// True when this transition entered a terminal state.
    pub fn reached_terminal(&self) -> bool {
        self.changed() && self.to.is_terminal()
    }
}

// =============================================================================
// Payment Attempt
// =============================================================================

/// One try at collecting payment for a sale.
///
/// Fields are private: every change goes through a transition method so a
/// terminal attempt cannot be edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    id: String,
    method: PaymentMethod,
    state: PaymentState,
    amount_due: Money,
    /// Amount pushed to the gateway (`amount_due` rounded up).
    gateway_amount: Money,
    phone: Option<String>,
    external_request_id: Option<String>,
    settled_amount: Option<Money>,
    external_receipt_ref: Option<String>,
    poll_count: u32,
    max_polls: u32,
    failure: Option<FailureReason>,
    amount_mismatch: bool,
    tendered: Option<Money>,
    change: Option<Money>,
}

impl PaymentAttempt {
    /// Starts a cash attempt.
    pub fn cash(amount_due: Money) -> Self {
        PaymentAttempt {
            id: Uuid::new_v4().to_string(),
            method: PaymentMethod::Cash,
            state: PaymentState::Idle,
            amount_due,
            gateway_amount: amount_due,
            phone: None,
            external_request_id: None,
            settled_amount: None,
            external_receipt_ref: None,
            poll_count: 0,
            max_polls: 0,
            failure: None,
            amount_mismatch: false,
            tendered: None,
            change: None,
        }
    }

    /// Starts a mobile-money attempt against a normalized phone number.
    ///
    /// Push payments need a positive whole-unit amount, so a fully
    /// discounted cart must go through cash.
    pub fn mobile_money(amount_due: Money, phone: String, max_polls: u32) -> CoreResult<Self> {
        if !amount_due.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "amount".to_string(),
            }
            .into());
        }

        Ok(PaymentAttempt {
            id: Uuid::new_v4().to_string(),
            method: PaymentMethod::MobileMoney,
            state: PaymentState::Idle,
            amount_due,
            gateway_amount: amount_due.ceil_to_major(),
            phone: Some(phone),
            external_request_id: None,
            settled_amount: None,
            external_receipt_ref: None,
            poll_count: 0,
            max_polls: max_polls.max(1),
            failure: None,
            amount_mismatch: false,
            tendered: None,
            change: None,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn amount_due(&self) -> Money {
        self.amount_due
    }

    pub fn gateway_amount(&self) -> Money {
        self.gateway_amount
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn external_request_id(&self) -> Option<&str> {
        self.external_request_id.as_deref()
    }

    pub fn settled_amount(&self) -> Option<Money> {
        self.settled_amount
    }

    pub fn external_receipt_ref(&self) -> Option<&str> {
        self.external_receipt_ref.as_deref()
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count
    }

    pub fn max_polls(&self) -> u32 {
        self.max_polls
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub fn amount_mismatch(&self) -> bool {
        self.amount_mismatch
    }

    pub fn tendered(&self) -> Option<Money> {
        self.tendered
    }

    pub fn change(&self) -> Option<Money> {
        self.change
    }

    /// Failed on poll budget; the charge may still complete.
    pub fn needs_manual_verification(&self) -> bool {
        self.failure
            .as_ref()
            .map(FailureReason::verify_manually)
            .unwrap_or(false)
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    fn invalid(&self, action: &'static str) -> CoreError {
        CoreError::InvalidPaymentTransition {
            attempt_id: self.id.clone(),
            state: self.state,
            action,
        }
    }

    fn move_to(&mut self, to: PaymentState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to }
    }

    /// Cash: `Idle → Success` when the tendered cash covers the total.
    ///
    /// Short cash is refused with `InsufficientCash` and the attempt stays
    /// `Idle`; it is a precondition, not a failure.
    pub fn settle_cash(&mut self, tendered: Money) -> CoreResult<Transition> {
        if self.method != PaymentMethod::Cash || self.state != PaymentState::Idle {
            return Err(self.invalid("settle cash"));
        }

        crate::validation::validate_tendered_cents(tendered.cents())?;

        if tendered < self.amount_due {
            return Err(CoreError::InsufficientCash {
                due: self.amount_due,
                tendered,
            });
        }

        self.tendered = Some(tendered);
        self.change = Some(tendered - self.amount_due);
        self.settled_amount = Some(self.amount_due);
        Ok(self.move_to(PaymentState::Success))
    }

    /// Mobile money: the push request was accepted, `Idle → Pending`.
    pub fn mark_issued(&mut self, request_id: String) -> CoreResult<Transition> {
        if self.method != PaymentMethod::MobileMoney || self.state != PaymentState::Idle {
            return Err(self.invalid("issue push request"));
        }

        self.external_request_id = Some(request_id);
        Ok(self.move_to(PaymentState::Pending))
    }

    /// Mobile money: the push request could not be sent, `Idle → Failed`.
    pub fn mark_issuance_failed(&mut self, message: String) -> CoreResult<Transition> {
        if self.method != PaymentMethod::MobileMoney || self.state != PaymentState::Idle {
            return Err(self.invalid("record issuance failure"));
        }

        self.failure = Some(FailureReason::IssuanceFailed { message });
        Ok(self.move_to(PaymentState::Failed))
    }

    /// Applies one poll result.
    ///
    /// ## Rules
    /// - Terminal attempt: no-op, nothing counted
    /// - Pending or transient error: `poll_count += 1`; on reaching
    ///   `max_polls` the attempt fails with `Timeout`
    /// - Success: settled amount captured; a difference above `tolerance`
    ///   sets `amount_mismatch` but the payment is still accepted
    pub fn apply_poll(
        &mut self,
        observation: PollObservation,
        tolerance: Money,
    ) -> CoreResult<Transition> {
        if self.state.is_terminal() {
            return Ok(Transition {
                from: self.state,
                to: self.state,
            });
        }
        if self.state != PaymentState::Pending {
            return Err(self.invalid("poll"));
        }

        self.poll_count += 1;

        let status = match observation {
            PollObservation::Status(status) => status,
            PollObservation::TransientError(_) => GatewayStatus::Pending,
        };

        match status {
            GatewayStatus::Pending => {
                if self.poll_count >= self.max_polls {
                    self.failure = Some(FailureReason::Timeout {
                        polls: self.poll_count,
                    });
                    return Ok(self.move_to(PaymentState::Failed));
                }
                Ok(Transition {
                    from: PaymentState::Pending,
                    to: PaymentState::Pending,
                })
            }
            GatewayStatus::Success {
                settled_amount,
                receipt_ref,
            } => {
                let settled = settled_amount.unwrap_or(self.gateway_amount);
                self.amount_mismatch = (settled - self.amount_due).abs() > tolerance;
                self.settled_amount = Some(settled);
                self.external_receipt_ref = receipt_ref;
                Ok(self.move_to(PaymentState::Success))
            }
            GatewayStatus::Cancelled { message } => {
                self.failure = Some(FailureReason::Cancelled { message });
                Ok(self.move_to(PaymentState::Cancelled))
            }
            GatewayStatus::Failed { message } => {
                self.failure = Some(FailureReason::Declined { message });
                Ok(self.move_to(PaymentState::Failed))
            }
        }
    }

    /// Builds the unresolved-charge record for a push request whose
    /// outcome is unknown. `None` when no request was ever issued.
    pub fn unresolved_charge(
        &self,
        draft: SaleDraft,
        reason: UnresolvedReason,
    ) -> Option<UnresolvedCharge> {
        let request_id = self.external_request_id.clone()?;

        Some(UnresolvedCharge {
            request_id,
            attempt_id: self.id.clone(),
            amount: self.gateway_amount,
            phone: self.phone.clone().unwrap_or_default(),
            draft,
            reason,
            created_at: Utc::now(),
        })
    }

    /// What the operator should see right now.
    pub fn operator_status(&self) -> OperatorStatus {
        match self.state {
            PaymentState::Idle | PaymentState::Pending => OperatorStatus::CollectingPayment {
                poll_count: self.poll_count,
                max_polls: self.max_polls,
            },
            PaymentState::Success => OperatorStatus::Success {
                amount_mismatch: self.amount_mismatch,
            },
            PaymentState::Failed => OperatorStatus::Failed {
                reason: self
                    .failure
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "Payment failed".to_string()),
                verify_manually: self.needs_manual_verification(),
            },
            PaymentState::Cancelled => OperatorStatus::Cancelled {
                reason: self
                    .failure
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "Payment cancelled".to_string()),
            },
        }
    }
}

// =============================================================================
// Operator Status
// =============================================================================

/// The four things an operator can see during checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperatorStatus {
    CollectingPayment { poll_count: u32, max_polls: u32 },
    Success { amount_mismatch: bool },
    Failed { reason: String, verify_manually: bool },
    Cancelled { reason: String },
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorStatus::CollectingPayment { poll_count: 0, .. } => {
                f.write_str("Collecting payment...")
            }
            OperatorStatus::CollectingPayment {
                poll_count,
                max_polls,
            } => write!(f, "Collecting payment (check {}/{})", poll_count, max_polls),
            OperatorStatus::Success {
                amount_mismatch: false,
            } => f.write_str("Payment received"),
            OperatorStatus::Success {
                amount_mismatch: true,
            } => f.write_str("Payment received, amount differs: review"),
            OperatorStatus::Failed { reason, .. } => f.write_str(reason),
            OperatorStatus::Cancelled { reason } => f.write_str(reason),
        }
    }
}

// =============================================================================
// Unresolved Charges
// =============================================================================

/// Why a push charge was left without a known outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    PollBudgetExhausted,
    SessionClosed,
}

impl UnresolvedReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            UnresolvedReason::PollBudgetExhausted => "poll_budget_exhausted",
            UnresolvedReason::SessionClosed => "session_closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "poll_budget_exhausted" => Some(UnresolvedReason::PollBudgetExhausted),
            "session_closed" => Some(UnresolvedReason::SessionClosed),
            _ => None,
        }
    }
}

/// How an unresolved charge was closed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeResolution {
    /// The gateway confirmed payment and the sale was settled.
    Settled,
    /// The gateway reported the charge cancelled or failed.
    Closed,
}

impl ChargeResolution {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChargeResolution::Settled => "settled",
            ChargeResolution::Closed => "closed",
        }
    }
}

/// A push charge that may still settle out-of-band.
///
/// Carries the sale draft so the sale can be settled later if the gateway
/// eventually reports success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedCharge {
    pub request_id: String,
    pub attempt_id: String,
    pub amount: Money,
    pub phone: String,
    pub draft: SaleDraft,
    pub reason: UnresolvedReason,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::CartTotals;

    const TOLERANCE: Money = Money::from_cents(100);

    fn pending_attempt(max_polls: u32) -> PaymentAttempt {
        let mut attempt =
            PaymentAttempt::mobile_money(Money::from_major(1160), "254712345678".into(), max_polls)
                .unwrap();
        attempt.mark_issued("req-1".into()).unwrap();
        attempt
    }

    fn status(s: GatewayStatus) -> PollObservation {
        PollObservation::Status(s)
    }

    fn success(amount: Option<Money>) -> PollObservation {
        status(GatewayStatus::Success {
            settled_amount: amount,
            receipt_ref: Some("RCP123".into()),
        })
    }

    #[test]
    fn test_cash_exact_and_change() {
        let mut attempt = PaymentAttempt::cash(Money::from_major(1160));
        let t = attempt.settle_cash(Money::from_major(1200)).unwrap();

        assert_eq!(t.from, PaymentState::Idle);
        assert_eq!(t.to, PaymentState::Success);
        assert_eq!(attempt.change(), Some(Money::from_major(40)));
    }

    #[test]
    fn test_cash_short_stays_idle() {
        let mut attempt = PaymentAttempt::cash(Money::from_major(1160));
        let err = attempt.settle_cash(Money::from_major(1000)).unwrap_err();

        assert!(matches!(err, CoreError::InsufficientCash { .. }));
        assert_eq!(attempt.state(), PaymentState::Idle);
        assert!(attempt.change().is_none());
    }

    #[test]
    fn test_cash_cannot_settle_twice() {
        let mut attempt = PaymentAttempt::cash(Money::from_major(10));
        attempt.settle_cash(Money::from_major(10)).unwrap();
        assert!(matches!(
            attempt.settle_cash(Money::from_major(10)),
            Err(CoreError::InvalidPaymentTransition { .. })
        ));
    }

    #[test]
    fn test_gateway_amount_rounds_up() {
        let attempt =
            PaymentAttempt::mobile_money(Money::from_cents(92_850), "254712345678".into(), 5)
                .unwrap();
        assert_eq!(attempt.gateway_amount(), Money::from_major(929));
    }

    #[test]
    fn test_mobile_money_rejects_zero_amount() {
        assert!(PaymentAttempt::mobile_money(Money::zero(), "254712345678".into(), 5).is_err());
    }

    #[test]
    fn test_issuance_failure_is_terminal() {
        let mut attempt =
            PaymentAttempt::mobile_money(Money::from_major(10), "254712345678".into(), 5).unwrap();
        let t = attempt.mark_issuance_failed("invalid msisdn".into()).unwrap();

        assert!(t.reached_terminal());
        assert_eq!(attempt.state(), PaymentState::Failed);
        assert!(!attempt.needs_manual_verification());
        assert!(attempt.mark_issued("late".into()).is_err());
    }

    #[test]
    fn test_pending_then_success() {
        let mut attempt = pending_attempt(10);

        for _ in 0..3 {
            let t = attempt
                .apply_poll(status(GatewayStatus::Pending), TOLERANCE)
                .unwrap();
            assert!(!t.changed());
        }
        let t = attempt.apply_poll(success(None), TOLERANCE).unwrap();

        assert!(t.reached_terminal());
        assert_eq!(attempt.poll_count(), 4);
        assert_eq!(attempt.settled_amount(), Some(Money::from_major(1160)));
        assert_eq!(attempt.external_receipt_ref(), Some("RCP123"));
        assert!(!attempt.amount_mismatch());
    }

    #[test]
    fn test_poll_after_terminal_is_noop() {
        let mut attempt = pending_attempt(10);
        attempt.apply_poll(success(None), TOLERANCE).unwrap();

        let t = attempt
            .apply_poll(status(GatewayStatus::Failed { message: "x".into() }), TOLERANCE)
            .unwrap();

        assert!(!t.changed());
        assert_eq!(attempt.state(), PaymentState::Success);
        assert_eq!(attempt.poll_count(), 1);
    }

    #[test]
    fn test_transient_errors_count_as_pending() {
        let mut attempt = pending_attempt(3);

        attempt
            .apply_poll(PollObservation::TransientError("timeout".into()), TOLERANCE)
            .unwrap();
        attempt
            .apply_poll(status(GatewayStatus::Pending), TOLERANCE)
            .unwrap();
        assert_eq!(attempt.state(), PaymentState::Pending);

        let t = attempt
            .apply_poll(PollObservation::TransientError("502".into()), TOLERANCE)
            .unwrap();

        assert!(t.reached_terminal());
        assert_eq!(attempt.state(), PaymentState::Failed);
        assert_eq!(attempt.failure(), Some(&FailureReason::Timeout { polls: 3 }));
        assert!(attempt.needs_manual_verification());
    }

    #[test]
    fn test_amount_mismatch_still_succeeds() {
        let mut attempt = pending_attempt(5);
        attempt
            .apply_poll(success(Some(Money::from_major(1100))), TOLERANCE)
            .unwrap();

        assert_eq!(attempt.state(), PaymentState::Success);
        assert!(attempt.amount_mismatch());
        assert_eq!(
            attempt.operator_status(),
            OperatorStatus::Success {
                amount_mismatch: true
            }
        );
    }

    #[test]
    fn test_rounding_within_tolerance() {
        let mut attempt =
            PaymentAttempt::mobile_money(Money::from_cents(92_850), "254712345678".into(), 5)
                .unwrap();
        attempt.mark_issued("req".into()).unwrap();
        attempt.apply_poll(success(None), TOLERANCE).unwrap();

        // 929.00 settled against 928.50 due
        assert!(!attempt.amount_mismatch());
    }

    #[test]
    fn test_cancelled_and_failed() {
        let mut attempt = pending_attempt(5);
        attempt
            .apply_poll(status(GatewayStatus::Cancelled { message: None }), TOLERANCE)
            .unwrap();
        assert_eq!(attempt.state(), PaymentState::Cancelled);

        let mut attempt = pending_attempt(5);
        attempt
            .apply_poll(
                status(GatewayStatus::Failed {
                    message: "insufficient funds".into(),
                }),
                TOLERANCE,
            )
            .unwrap();
        assert_eq!(
            attempt.operator_status(),
            OperatorStatus::Failed {
                reason: "Payment failed: insufficient funds".into(),
                verify_manually: false
            }
        );
    }

    #[test]
    fn test_poll_before_issue_is_invalid() {
        let mut attempt =
            PaymentAttempt::mobile_money(Money::from_major(10), "254712345678".into(), 5).unwrap();
        assert!(attempt
            .apply_poll(status(GatewayStatus::Pending), TOLERANCE)
            .is_err());
    }

    #[test]
    fn test_unresolved_charge_requires_request_id() {
        let draft = SaleDraft {
            lines: vec![],
            totals: CartTotals::empty(),
            customer_phone: None,
            loyalty_account_id: None,
        };

        let idle =
            PaymentAttempt::mobile_money(Money::from_major(10), "254712345678".into(), 5).unwrap();
        assert!(idle
            .unresolved_charge(draft.clone(), UnresolvedReason::SessionClosed)
            .is_none());

        let pending = pending_attempt(5);
        let charge = pending
            .unresolved_charge(draft, UnresolvedReason::SessionClosed)
            .unwrap();
        assert_eq!(charge.request_id, "req-1");
        assert_eq!(charge.attempt_id, pending.id());
        assert_eq!(charge.amount, Money::from_major(1160));
    }

    #[test]
    fn test_operator_status_counter() {
        let mut attempt = pending_attempt(20);
        attempt
            .apply_poll(status(GatewayStatus::Pending), TOLERANCE)
            .unwrap();
        assert_eq!(
            attempt.operator_status().to_string(),
            "Collecting payment (check 1/20)"
        );
    }
}
