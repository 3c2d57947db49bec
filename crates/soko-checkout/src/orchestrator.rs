//! # Payment Orchestrator
//!
//! Starts payment attempts on either rail.
//!
//! ```text
//!   cash ─────────► PaymentAttempt::cash ─► settle_cash ─► Success
//!                                                │
//!                                                └─► InsufficientCash (state kept)
//!
//!   mobile money ─► PaymentAttempt::mobile_money
//!                        │
//!                        ▼
//!                   gateway.initiate(phone, ceil(total), attempt_id)
//!                        │
//!               ok ──────┴────── err
//!               │                 │
//!         mark_issued        mark_issuance_failed ─► Failed (no poller)
//!               │
//!         PaymentPoller::spawn ─► PendingPayment
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use soko_core::{Money, PaymentAttempt};

use crate::config::PollingSettings;
use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::MobileMoneyGateway;
use crate::notify::{Notification, Notifier};
use crate::poller::{PaymentPoller, PendingPayment, PollerSettings};

/// Starts and settles payment attempts.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    gateway: Option<Arc<dyn MobileMoneyGateway>>,
    polling: PollingSettings,
    tolerance: Money,
    notifier: Arc<dyn Notifier>,
}

impl PaymentOrchestrator {
    pub fn new(
        gateway: Option<Arc<dyn MobileMoneyGateway>>,
        polling: PollingSettings,
        tolerance: Money,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        PaymentOrchestrator {
            gateway,
            polling,
            tolerance,
            notifier,
        }
    }

    pub fn mobile_money_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    pub fn gateway(&self) -> Option<&Arc<dyn MobileMoneyGateway>> {
        self.gateway.as_ref()
    }

    pub fn tolerance(&self) -> Money {
        self.tolerance
    }

    /// Takes a cash payment. Short cash is refused with nothing recorded.
    pub fn pay_cash(&self, amount_due: Money, tendered: Money) -> CheckoutResult<PaymentAttempt> {
        let mut attempt = PaymentAttempt::cash(amount_due);
        attempt.settle_cash(tendered)?;

        info!(
            attempt_id = %attempt.id(),
            amount_due = %amount_due,
            tendered = %tendered,
            change = %attempt.change().unwrap_or(Money::zero()),
            "Cash payment accepted"
        );
        Ok(attempt)
    }

    /// Sends a push payment request and starts polling it.
    ///
    /// `phone` must already be normalized. An issuance failure is not an
    /// error: the returned payment is terminal `Failed` with the gateway's
    /// message and nothing is polled.
    pub async fn start_mobile_money(&self, amount_due: Money, phone: String) -> CheckoutResult<PendingPayment> {
        let gateway = self
            .gateway
            .clone()
            .ok_or(CheckoutError::GatewayNotConfigured)?;

        let mut attempt = PaymentAttempt::mobile_money(amount_due, phone.clone(), self.polling.max_attempts)?;

        let issued = gateway
            .initiate(&phone, attempt.gateway_amount(), attempt.id())
            .await;

        match issued {
            Ok(request) => {
                info!(
                    attempt_id = %attempt.id(),
                    request_id = %request.request_id,
                    amount = %attempt.gateway_amount(),
                    "Push payment issued"
                );
                attempt.mark_issued(request.request_id)?;
                self.notify_transition(&attempt);

                let settings = PollerSettings {
                    initial_delay: self.polling.initial_delay(),
                    interval: self.polling.interval(),
                    tolerance: self.tolerance,
                };
                Ok(PaymentPoller::spawn(
                    attempt,
                    gateway,
                    settings,
                    Arc::clone(&self.notifier),
                ))
            }
            Err(e) => {
                warn!(attempt_id = %attempt.id(), error = %e, "Push payment request failed");
                attempt.mark_issuance_failed(e.to_string())?;
                self.notify_transition(&attempt);
                Ok(PendingPayment::finished(attempt))
            }
        }
    }

    fn notify_transition(&self, attempt: &PaymentAttempt) {
        if let Some(notification) = Notification::for_transition(attempt) {
            self.notifier.notify(notification);
        }
    }
}
