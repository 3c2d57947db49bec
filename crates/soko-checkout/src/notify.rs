//! # Operator Notifications
//!
//! Turns payment transitions and settlement trouble into short operator
//! messages. The UI shell supplies its own `Notifier`; the default just logs.

use std::sync::Mutex;

use tracing::{error, info, warn};

use soko_core::{Money, OperatorStatus, PaymentAttempt, PaymentState, UnresolvedCharge};

/// How loudly the UI should surface a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// One operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Notification {
            level,
            title: title.into(),
            message: message.into(),
        }
    }

    /// Notification for an attempt that just changed state. `None` for
    /// transitions the operator does not need to hear about.
    pub fn for_transition(attempt: &PaymentAttempt) -> Option<Self> {
        match (attempt.state(), attempt.operator_status()) {
            (PaymentState::Pending, _) => Some(Notification::new(
                NotificationLevel::Info,
                "Payment requested",
                format!(
                    "Waiting for the customer to approve {} on their phone",
                    attempt.gateway_amount()
                ),
            )),
            (_, OperatorStatus::Success { amount_mismatch }) => {
                let amount = attempt.settled_amount().unwrap_or(attempt.amount_due());
                Some(Notification::new(
                    if amount_mismatch {
                        NotificationLevel::Warning
                    } else {
                        NotificationLevel::Info
                    },
                    "Payment received",
                    format!("{} received", amount),
                ))
            }
            (_, OperatorStatus::Failed { reason, verify_manually }) => {
                let message = if verify_manually {
                    format!("{}. Verify the payment manually before retrying.", reason)
                } else {
                    reason
                };
                Some(Notification::new(NotificationLevel::Error, "Payment failed", message))
            }
            (_, OperatorStatus::Cancelled { reason }) => Some(Notification::new(
                NotificationLevel::Warning,
                "Payment cancelled",
                reason,
            )),
            _ => None,
        }
    }

    pub fn amount_mismatch(expected: Money, settled: Money) -> Self {
        Notification::new(
            NotificationLevel::Warning,
            "Amount mismatch",
            format!("Expected {}, gateway settled {}", expected, settled),
        )
    }

    pub fn unresolved_charge(charge: &UnresolvedCharge) -> Self {
        Notification::new(
            NotificationLevel::Warning,
            "Unverified mobile-money charge",
            format!(
                "Charge {} for {} to {} has no confirmed outcome",
                charge.request_id, charge.amount, charge.phone
            ),
        )
    }

    pub fn settlement_incomplete(receipt_number: &str, failed_steps: &[&str]) -> Self {
        Notification::new(
            NotificationLevel::Warning,
            "Sale saved, records pending",
            format!(
                "Sale {} completed; {} will be retried",
                receipt_number,
                failed_steps.join(", ")
            ),
        )
    }

    /// Steps failed and the journal could not take them either, so nothing
    /// will retry them.
    pub fn settlement_unjournaled(receipt_number: &str, failed_steps: &[&str]) -> Self {
        Notification::new(
            NotificationLevel::Error,
            "Manual reconciliation needed",
            format!(
                "Sale {} completed but {} could not be queued for retry",
                receipt_number,
                failed_steps.join(", ")
            ),
        )
    }

    pub fn settlement_flagged(attempt_id: &str, attempts: u32) -> Self {
        Notification::new(
            NotificationLevel::Error,
            "Manual reconciliation needed",
            format!(
                "Settlement {} still incomplete after {} attempts",
                attempt_id, attempts
            ),
        )
    }
}

// =============================================================================
// Notifier
// =============================================================================

/// Receives operator notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Logs notifications at the matching `tracing` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        match n.level {
            NotificationLevel::Info => info!(title = %n.title, "{}", n.message),
            NotificationLevel::Warning => warn!(title = %n.title, "{}", n.message),
            NotificationLevel::Error => error!(title = %n.title, "{}", n.message),
        }
    }
}

/// Keeps every notification for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn titles(&self) -> Vec<String> {
        self.notifications().into_iter().map(|n| n.title).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.push(notification);
    }
}
