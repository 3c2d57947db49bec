//! # Payment Poller
//!
//! Drives one pending mobile-money attempt to a terminal state.
//!
//! ## Poll Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          PaymentPoller task                             │
//! │                                                                         │
//! │   ┌──────────────────────── select! ────────────────────────┐          │
//! │   │                                                          │          │
//! │   │  sleep(initial_delay, then interval) ──► poll_once       │          │
//! │   │  command_rx: PollNow                 ──► poll_once       │          │
//! │   │  shutdown_rx                         ──► stop            │          │
//! │   └──────────────────────────────────────────────────────────┘          │
//! │                                                                         │
//! │   poll_once: query_status ─► PaymentAttempt::apply_poll ─► watch::send  │
//! │                                                                         │
//! │   Loop ends as soon as the attempt is terminal: later PollNow requests  │
//! │   find the channel closed and never reach the gateway.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The task is the only writer of the attempt. Everyone else reads
//! snapshots from the `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use soko_core::{Money, PaymentAttempt, PaymentState, PollObservation};

use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::MobileMoneyGateway;
use crate::notify::{Notification, Notifier};

// =============================================================================
// Poller Settings
// =============================================================================

/// Timing and tolerance for one poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    /// Wait before the first status query.
    pub initial_delay: Duration,
    /// Wait between later queries.
    pub interval: Duration,
    /// Settled-amount difference accepted without a mismatch flag.
    pub tolerance: Money,
}

#[derive(Debug, Clone, Copy)]
enum PollCommand {
    PollNow,
}

// =============================================================================
// Poller Handle
// =============================================================================

/// Cloneable handle to a running (or finished) poll loop.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    status_rx: watch::Receiver<PaymentAttempt>,
    command_tx: mpsc::Sender<PollCommand>,
    shutdown_tx: mpsc::Sender<()>,
}

impl PollerHandle {
    /// Latest published attempt.
    pub fn snapshot(&self) -> PaymentAttempt {
        self.status_rx.borrow().clone()
    }

    /// A receiver that wakes on every published change.
    pub fn subscribe(&self) -> watch::Receiver<PaymentAttempt> {
        self.status_rx.clone()
    }

    /// Requests an immediate status query. Does nothing once the attempt is
    /// terminal.
    pub async fn poll_now(&self) {
        if self.command_tx.send(PollCommand::PollNow).await.is_err() {
            debug!("Poll requested after the poller finished");
        }
    }

    /// Asks the task to stop without waiting for it.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Waits until the attempt reaches a terminal state.
    ///
    /// Fails with `PollerStopped` when the task was shut down first.
    pub async fn wait_terminal(&self) -> CheckoutResult<PaymentAttempt> {
        let mut rx = self.status_rx.clone();
        let attempt = rx
            .wait_for(PaymentAttempt::is_terminal)
            .await
            .map_err(|_| CheckoutError::PollerStopped)?;
        Ok(attempt.clone())
    }
}

/// A payment attempt plus the task driving it.
#[derive(Debug)]
pub struct PendingPayment {
    handle: PollerHandle,
    task: Option<JoinHandle<()>>,
}

impl PendingPayment {
    /// An attempt that is already terminal; nothing to poll.
    pub fn finished(attempt: PaymentAttempt) -> Self {
        let (_status_tx, status_rx) = watch::channel(attempt);
        let (command_tx, _) = mpsc::channel(1);
        let (shutdown_tx, _) = mpsc::channel(1);

        PendingPayment {
            handle: PollerHandle {
                status_rx,
                command_tx,
                shutdown_tx,
            },
            task: None,
        }
    }

    pub fn handle(&self) -> &PollerHandle {
        &self.handle
    }

    pub fn snapshot(&self) -> PaymentAttempt {
        self.handle.snapshot()
    }

    pub fn attempt_id(&self) -> String {
        self.handle.status_rx.borrow().id().to_string()
    }

    /// True while the poll task is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub async fn wait_terminal(&self) -> CheckoutResult<PaymentAttempt> {
        self.handle.wait_terminal().await
    }

    /// Stops the poll task, waits for it to exit and returns the final
    /// attempt. No timer outlives this call.
    pub async fn stop(mut self) -> PaymentAttempt {
        if let Some(task) = self.task.take() {
            self.handle.shutdown().await;
            if let Err(e) = task.await {
                warn!(error = %e, "Payment poller task ended abnormally");
            }
        }
        self.handle.snapshot()
    }
}

impl Drop for PendingPayment {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Payment Poller
// =============================================================================

/// Owns a pending attempt and polls the gateway until it is terminal.
pub struct PaymentPoller {
    attempt: PaymentAttempt,
    gateway: Arc<dyn MobileMoneyGateway>,
    settings: PollerSettings,
    notifier: Arc<dyn Notifier>,
    status_tx: watch::Sender<PaymentAttempt>,
    command_rx: mpsc::Receiver<PollCommand>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl PaymentPoller {
    /// Spawns the poll loop for an attempt that has been issued.
    pub fn spawn(
        attempt: PaymentAttempt,
        gateway: Arc<dyn MobileMoneyGateway>,
        settings: PollerSettings,
        notifier: Arc<dyn Notifier>,
    ) -> PendingPayment {
        let (status_tx, status_rx) = watch::channel(attempt.clone());
        let (command_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let poller = PaymentPoller {
            attempt,
            gateway,
            settings,
            notifier,
            status_tx,
            command_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(poller.run());

        PendingPayment {
            handle: PollerHandle {
                status_rx,
                command_tx,
                shutdown_tx,
            },
            task: Some(task),
        }
    }

    /// Runs until the attempt is terminal or shutdown is requested.
    async fn run(mut self) {
        info!(
            attempt_id = %self.attempt.id(),
            max_polls = self.attempt.max_polls(),
            "Payment poller starting"
        );

        let mut delay = self.settings.initial_delay;

        while !self.attempt.is_terminal() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.poll_once().await;
                    delay = self.settings.interval;
                }

                command = self.command_rx.recv() => match command {
                    Some(PollCommand::PollNow) => {
                        self.poll_once().await;
                        delay = self.settings.interval;
                    }
                    None => break,
                },

                _ = self.shutdown_rx.recv() => {
                    info!(
                        attempt_id = %self.attempt.id(),
                        poll_count = self.attempt.poll_count(),
                        "Payment poller shut down while pending"
                    );
                    break;
                }
            }
        }

        debug!(
            attempt_id = %self.attempt.id(),
            state = %self.attempt.state(),
            "Payment poller stopped"
        );
    }

    /// One status query, applied to the attempt and published.
    async fn poll_once(&mut self) {
        let Some(request_id) = self.attempt.external_request_id().map(str::to_string) else {
            error!(attempt_id = %self.attempt.id(), "Pending attempt has no request id");
            return;
        };

        let observation = match self
            .gateway
            .query_status(&request_id, self.attempt.gateway_amount())
            .await
        {
            Ok(status) => PollObservation::Status(status),
            Err(e) => {
                warn!(
                    attempt_id = %self.attempt.id(),
                    error = %e,
                    retryable = e.is_retryable(),
                    "Status query failed, counting as pending"
                );
                PollObservation::TransientError(e.to_string())
            }
        };

        let transition = match self.attempt.apply_poll(observation, self.settings.tolerance) {
            Ok(t) => t,
            Err(e) => {
                error!(attempt_id = %self.attempt.id(), error = %e, "Poll rejected by payment state");
                return;
            }
        };

        debug!(
            attempt_id = %self.attempt.id(),
            poll_count = self.attempt.poll_count(),
            state = %self.attempt.state(),
            "Payment polled"
        );

        self.status_tx.send_replace(self.attempt.clone());

        if transition.changed() {
            self.report_transition();
        }
    }

    fn report_transition(&self) {
        let attempt = &self.attempt;

        match attempt.state() {
            PaymentState::Success => {
                info!(
                    attempt_id = %attempt.id(),
                    poll_count = attempt.poll_count(),
                    receipt_ref = attempt.external_receipt_ref().unwrap_or("-"),
                    "Mobile-money payment succeeded"
                );
                if attempt.amount_mismatch() {
                    let settled = attempt.settled_amount().unwrap_or(attempt.gateway_amount());
                    warn!(
                        attempt_id = %attempt.id(),
                        expected = %attempt.amount_due(),
                        settled = %settled,
                        "Settled amount differs from amount due"
                    );
                    self.notifier
                        .notify(Notification::amount_mismatch(attempt.amount_due(), settled));
                }
            }
            state => {
                warn!(
                    attempt_id = %attempt.id(),
                    state = %state,
                    poll_count = attempt.poll_count(),
                    reason = attempt.failure().map(ToString::to_string).unwrap_or_default(),
                    "Mobile-money payment did not complete"
                );
            }
        }

        if let Some(notification) = Notification::for_transition(attempt) {
            self.notifier.notify(notification);
        }
    }
}
